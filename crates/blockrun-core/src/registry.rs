//! Executor registry.
//!
//! The directory of live contexts, keyed by language and then file. Contexts
//! are created lazily on first use, reused while alive and evicted as soon as
//! their closed signal fires.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use rustc_hash::FxHashMap;
use tokio::sync::broadcast;

use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::language::Language;
use crate::one_shot::{OneShotExecutor, OneShotFlavor, OneShotOptions};
use crate::session::{SessionExecutor, SessionLaunch, dialect_for};
use crate::settings::ExecutorSettings;
use crate::sink::{LogNotifier, Notifier};

/// Capacity of the registry event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

type ContextMap = FxHashMap<Language, FxHashMap<String, ExecutionContext>>;

/// Something observers of the registry may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A session context was created.
    Added { language: Language, file: String },
}

struct RegistryInner {
    settings: ExecutorSettings,
    notifier: Arc<dyn Notifier>,
    contexts: Mutex<ContextMap>,
    events: broadcast::Sender<RegistryEvent>,
}

/// Registry of execution contexts, one per `(language, file)`.
///
/// Cheap to clone; clones share the same contexts.
#[derive(Clone)]
pub struct ExecutorRegistry {
    inner: Arc<RegistryInner>,
}

impl ExecutorRegistry {
    /// Create a registry that reports notices through the log.
    pub fn new(settings: ExecutorSettings) -> Self {
        Self::with_notifier(settings, Arc::new(LogNotifier))
    }

    /// Create a registry with a custom notifier.
    pub fn with_notifier(settings: ExecutorSettings, notifier: Arc<dyn Notifier>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                settings,
                notifier,
                contexts: Mutex::new(FxHashMap::default()),
                events,
            }),
        }
    }

    /// Settings contexts are built from.
    pub fn settings(&self) -> &ExecutorSettings {
        &self.inner.settings
    }

    /// Subscribe to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    /// Get the context for `(language, file)`, creating it on first use.
    ///
    /// Interactive languages get a session context and fail with
    /// [`Error::NoInteractiveExecutor`] if they have no session dialect.
    /// `needs_shell` only affects generic one-shot contexts. Must be called
    /// from within a tokio runtime.
    pub fn get_executor_for(
        &self,
        file: &str,
        language: Language,
        needs_shell: bool,
    ) -> Result<ExecutionContext> {
        let mut contexts = self
            .inner
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let by_file = contexts.entry(language).or_default();

        if let Some(existing) = by_file.get(file) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
            tracing::debug!("Replacing closed {} context for {}", language, file);
        }

        let context = self.create(file, language, needs_shell)?;
        by_file.insert(file.to_string(), context.clone());
        drop(contexts);

        // One-shot contexts never close, so only sessions need an eviction task.
        if !context.is_one_shot() {
            self.watch_close(&context);
            let _ = self.inner.events.send(RegistryEvent::Added {
                language,
                file: file.to_string(),
            });
        }
        Ok(context)
    }

    fn create(&self, file: &str, language: Language, needs_shell: bool) -> Result<ExecutionContext> {
        let settings = &self.inner.settings;
        let language_settings = settings.language(language);
        let wsl = settings.wsl_enabled(language);
        let notifier = Arc::clone(&self.inner.notifier);

        if language_settings.interactive {
            let dialect = dialect_for(language, &language_settings)
                .ok_or(Error::NoInteractiveExecutor(language))?;
            let launch =
                SessionLaunch::from_settings(&language_settings, wsl, settings.allow_input);
            let session = SessionExecutor::spawn(file, language, &launch, dialect, notifier);
            return Ok(ExecutionContext::Session(session));
        }

        let options = match language {
            Language::C | Language::Cpp => OneShotOptions {
                uses_shell: false,
                wsl,
                allow_input: settings.allow_input,
                encoding: language_settings.encoding,
                flavor: OneShotFlavor::CFamily {
                    use_main: language_settings.use_main,
                },
            },
            Language::Powershell => OneShotOptions {
                uses_shell: true,
                wsl,
                allow_input: settings.allow_input,
                encoding: language_settings.encoding,
                flavor: OneShotFlavor::Plain,
            },
            _ => OneShotOptions {
                uses_shell: needs_shell,
                wsl,
                allow_input: settings.allow_input,
                encoding: language_settings.encoding,
                flavor: OneShotFlavor::Plain,
            },
        };
        Ok(ExecutionContext::OneShot(Arc::new(OneShotExecutor::new(
            file, language, options, notifier,
        ))))
    }

    /// Evict `context` once it closes, unless it was already replaced.
    fn watch_close(&self, context: &ExecutionContext) {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let closed = context.closed();
        let id = context.id();
        let language = context.language();
        let file = context.file().to_string();

        tokio::spawn(async move {
            closed.wait().await;
            let Some(inner) = registry.upgrade() else {
                return;
            };
            let Ok(mut contexts) = inner.contexts.lock() else {
                return;
            };
            if let Some(by_file) = contexts.get_mut(&language) {
                if by_file.get(&file).is_some_and(|c| c.id() == id) {
                    by_file.remove(&file);
                    tracing::debug!("Evicted closed {} context for {}", language, file);
                }
                if by_file.is_empty() {
                    contexts.remove(&language);
                }
            }
        });
    }

    /// Snapshot of every live context across all languages and files.
    pub fn contexts(&self) -> Vec<ExecutionContext> {
        self.inner
            .contexts
            .lock()
            .map(|contexts| {
                contexts
                    .values()
                    .flat_map(|by_file| by_file.values().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts().len()
    }

    /// Check if no contexts are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every live context, e.g. on host shutdown.
    ///
    /// Every context is stopped even if some fail; the first failure is returned.
    pub async fn stop_all(&self) -> Result<()> {
        let contexts = self.contexts();
        let results = futures::future::join_all(contexts.iter().map(|c| c.stop())).await;
        for (context, result) in contexts.iter().zip(&results) {
            if let Err(e) = result {
                tracing::error!("Failed to stop {:?}: {}", context, e);
            }
        }
        results.into_iter().collect()
    }
}
