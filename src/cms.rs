//! The CMS instance and its builder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::collector::{CMSCollector, ConcurrentMarkSweepThread};
use crate::util::log;
use crate::util::options::Options;
use crate::vm::{Collection, GCThreadContext, VMBinding};

/// Collects options before the old generation is created.
///
/// The options start from their defaults, overridden by `CMS_*` environment variables, and can
/// be changed with [`CMSBuilder::set_option`] and [`CMSBuilder::set_options_bulk_by_str`]
/// before [`CMSBuilder::build`].
pub struct CMSBuilder {
    pub options: Options,
}

impl CMSBuilder {
    /// Default options, with environment variable overrides.
    pub fn new() -> Self {
        CMSBuilder {
            options: Options::default(),
        }
    }

    /// Default options, ignoring the environment.
    pub fn new_no_env_vars() -> Self {
        CMSBuilder {
            options: Options::without_env(),
        }
    }

    /// Set an option by name.  Returns false if the name is unknown or the value is invalid.
    pub fn set_option(&mut self, name: &str, val: &str) -> bool {
        self.options.set_from_str(name, val)
    }

    /// Set options from a string of whitespace separated `name=value` pairs.
    pub fn set_options_bulk_by_str(&mut self, options: &str) -> bool {
        self.options.set_bulk_from_command_line(options)
    }

    pub fn build<VM: VMBinding>(&self) -> CMS<VM> {
        CMS::new(Arc::new(self.options.clone()))
    }
}

impl Default for CMSBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An old generation collected by concurrent mark-sweep.  A runtime usually keeps one in a
/// static, as the background thread needs a `'static` reference to it.
pub struct CMS<VM: VMBinding> {
    pub(crate) options: Arc<Options>,
    pub(crate) collector: CMSCollector<VM>,
    collection_initialized: AtomicBool,
}

impl<VM: VMBinding> CMS<VM> {
    pub fn new(options: Arc<Options>) -> Self {
        let collector = CMSCollector::new(options.clone());
        CMS {
            options,
            collector,
            collection_initialized: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn collector(&self) -> &CMSCollector<VM> {
        &self.collector
    }

    /// Start the background collector thread.  Until then no concurrent cycle is started, but
    /// foreground collections still run.
    pub fn initialize_collection(&'static self) {
        assert!(
            !self.collection_initialized.swap(true, Ordering::SeqCst),
            "initialize_collection() has been called"
        );
        VM::VMCollection::spawn_gc_thread(GCThreadContext::Controller(
            ConcurrentMarkSweepThread::new(&self.collector),
        ));
        log::debug!("Spawned the CMS background thread");
    }

    pub fn is_collection_initialized(&self) -> bool {
        self.collection_initialized.load(Ordering::SeqCst)
    }
}
