//! Proxies: 외부에서 구현된 런타임 함수를 이름으로 한 번만 선언하고 호출
//!
//! 생성 코드는 스토리지/트랜잭션 기능의 본문을 다시 만들지 않고 선언된
//! 프록시 핸들을 캡처해서 호출한다.

use crate::error::{TesseraError, TesseraResult};
use ahash::AHashMap;
use std::any::{Any, type_name};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Handle to a declared runtime function
pub struct Proxy<F: ?Sized> {
    name: &'static str,
    func: Arc<F>,
}

impl<F: ?Sized> Proxy<F> {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<F: ?Sized> Clone for Proxy<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            func: Arc::clone(&self.func),
        }
    }
}

impl<F: ?Sized> Deref for Proxy<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.func
    }
}

impl<F: ?Sized> fmt::Debug for Proxy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy({})", self.name)
    }
}

struct Declaration {
    signature: &'static str,
    func: Box<dyn Any + Send + Sync>,
}

/// Registry of declared proxies, one per emission context
#[derive(Default)]
pub struct ProxyRegistry {
    declared: AHashMap<&'static str, Declaration>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` the first time, reuse the existing body afterwards.
    ///
    /// Redeclaring a name with a different signature is a configuration error.
    pub fn declare<F>(
        &mut self,
        name: &'static str,
        define: impl FnOnce() -> Arc<F>,
    ) -> TesseraResult<Proxy<F>>
    where
        F: ?Sized + Send + Sync + 'static,
    {
        let declaration = self.declared.entry(name).or_insert_with(|| Declaration {
            signature: type_name::<F>(),
            func: Box::new(define()),
        });
        let func = declaration
            .func
            .downcast_ref::<Arc<F>>()
            .ok_or_else(|| {
                TesseraError::Config(format!(
                    "proxy '{name}' declared as {}, requested as {}",
                    declaration.signature,
                    type_name::<F>()
                ))
            })?;
        Ok(Proxy {
            name,
            func: Arc::clone(func),
        })
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type AddFn = dyn Fn(i64, i64) -> i64 + Send + Sync;
    type NegFn = dyn Fn(i64) -> i64 + Send + Sync;

    #[test]
    fn declared_once() {
        let mut registry = ProxyRegistry::new();
        let mut defined = 0;
        for _ in 0..3 {
            let add = registry
                .declare::<AddFn>("add", || {
                    defined += 1;
                    Arc::new(|a: i64, b: i64| a + b)
                })
                .unwrap();
            assert_eq!(add(2, 3), 5);
        }
        assert_eq!(defined, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn signature_mismatch() {
        let mut registry = ProxyRegistry::new();
        registry
            .declare::<AddFn>("op", || Arc::new(|a: i64, b: i64| a + b))
            .unwrap();
        let err = registry
            .declare::<NegFn>("op", || Arc::new(|a: i64| -a))
            .unwrap_err();
        assert!(matches!(err, TesseraError::Config(_)));
    }
}
