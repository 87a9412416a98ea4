//! Fetch method selection by URL scheme.

use crate::error::{FetchError, Result};
use crate::fetcher::{AptSrc, FetchMethod};
use crate::url::FetchUrl;

#[derive(Default)]
pub struct FetchRegistry {
    methods: Vec<Box<dyn FetchMethod>>,
}

impl FetchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in method.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(AptSrc::new()));
        registry
    }

    pub fn register(&mut self, method: Box<dyn FetchMethod>) {
        self.methods.push(method);
    }

    /// First registered method that supports `url`.
    pub fn select(&self, url: &FetchUrl) -> Result<&dyn FetchMethod> {
        self.methods
            .iter()
            .find(|m| m.supports(url))
            .map(|m| m.as_ref())
            .ok_or_else(|| FetchError::UnsupportedUrl {
                url: url.to_string(),
                scheme: url.scheme().to_string(),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }
}
