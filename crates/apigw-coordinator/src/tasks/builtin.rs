// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in tasks.

use async_trait::async_trait;
use tracing::info;

use super::{Task, TaskError, TaskRegistry};

/// Computes the n-th Fibonacci number and logs it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalcFib;

#[async_trait]
impl Task for CalcFib {
    const NAME: &'static str = "CalcFib";
    type Args = (u32,);

    async fn run(&self, args: Self::Args) -> Result<(), TaskError> {
        let (n,) = args;
        let value = fib(n).ok_or_else(|| TaskError::Failed(format!("fib({}) overflows u64", n)))?;
        info!(n, value, "CalcFib finished");
        Ok(())
    }
}

/// n-th Fibonacci number, `None` on overflow.
pub fn fib(n: u32) -> Option<u64> {
    if n == 0 {
        return Some(0);
    }
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 1..n {
        let next = a.checked_add(b)?;
        a = b;
        b = next;
    }
    Some(b)
}

/// Registry with every built-in task.
pub fn builtin_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register(CalcFib);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fib() {
        assert_eq!(fib(0), Some(0));
        assert_eq!(fib(1), Some(1));
        assert_eq!(fib(10), Some(55));
        assert_eq!(fib(93), Some(12_200_160_415_121_876_738));
        assert_eq!(fib(94), None);
    }

    #[tokio::test]
    async fn test_calc_fib_via_registry() {
        let registry = builtin_registry();
        assert!(registry.contains("CalcFib"));
        registry.invoke("CalcFib", vec![json!(10)]).await.unwrap();
        assert!(registry.invoke("CalcFib", vec![json!(100)]).await.is_err());
        assert!(registry.invoke("CalcFib", vec![]).await.is_err());
    }
}
