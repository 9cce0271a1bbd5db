//! Source transforms applied by hosts before a block reaches a context.

use std::borrow::Cow;

use crate::language::Language;
use crate::settings::ExecutorSettings;

/// A text-substitution pass over a block's source.
pub trait CodeTransform: Send + Sync {
    /// Rewrite `code`, a block of `language`.
    fn transform<'a>(&self, code: &'a str, language: Language) -> Cow<'a, str>;
}

/// Prepends each language's configured global injection.
#[derive(Debug, Clone)]
pub struct GlobalInject {
    settings: ExecutorSettings,
}

impl GlobalInject {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }
}

impl CodeTransform for GlobalInject {
    fn transform<'a>(&self, code: &'a str, language: Language) -> Cow<'a, str> {
        let inject = self
            .settings
            .languages
            .get(&language)
            .map(|l| l.inject.as_str())
            .unwrap_or_default();
        if inject.is_empty() {
            Cow::Borrowed(code)
        } else {
            Cow::Owned(format!("{}\n{}", inject, code))
        }
    }
}

/// Apply `transforms` in order.
pub fn apply_all<'a>(
    transforms: &[Box<dyn CodeTransform>],
    code: &'a str,
    language: Language,
) -> Cow<'a, str> {
    let mut code = Cow::Borrowed(code);
    for transform in transforms {
        let changed = match transform.transform(&code, language) {
            Cow::Borrowed(_) => None,
            Cow::Owned(changed) => Some(changed),
        };
        if let Some(changed) = changed {
            code = Cow::Owned(changed);
        }
    }
    code
}
