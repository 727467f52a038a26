//! The CMS token.
//!
//! Marking related work is done either by the background collector thread (the *CMS side*) or
//! by a thread that holds the world stopped: a foreground collection or a young collection (the
//! *VM side*).  Whoever does that work holds the token.  The VM side has priority: once it asks
//! for the token, the CMS side cannot take it, and a CMS side holder gives it up at its next
//! yield point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::util::log;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenSide {
    Cms,
    Vm,
}

#[derive(Default, Debug)]
struct TokenSync {
    cms_has_token: bool,
    cms_wants_token: bool,
    vm_has_token: bool,
    /// Number of VM side threads waiting.  Several young collection and foreground requests may
    /// queue up behind each other.
    vm_wants_token: usize,
}

pub struct CmsToken {
    sync: Mutex<TokenSync>,
    /// Notified whenever the token is released.
    released: Condvar,
    /// Mutators waiting for a lock the CMS side holds.  The CMS side yields while this is
    /// positive.
    pending_yields: AtomicUsize,
}

/// Holding the token.  Released on drop.
pub struct TokenGuard<'a> {
    token: &'a CmsToken,
    side: TokenSide,
}

impl CmsToken {
    pub fn new() -> Self {
        CmsToken {
            sync: Mutex::new(TokenSync::default()),
            released: Condvar::new(),
            pending_yields: AtomicUsize::new(0),
        }
    }

    pub fn acquire(&self, side: TokenSide) -> TokenGuard<'_> {
        self.synchronize(side);
        TokenGuard { token: self, side }
    }

    fn synchronize(&self, side: TokenSide) {
        let mut sync = self.sync.lock().unwrap();
        match side {
            TokenSide::Vm => {
                sync.vm_wants_token += 1;
                while sync.cms_has_token || sync.vm_has_token {
                    sync = self.released.wait(sync).unwrap();
                }
                sync.vm_wants_token -= 1;
                sync.vm_has_token = true;
            }
            TokenSide::Cms => {
                debug_assert!(!sync.cms_has_token, "the CMS side already holds the token");
                while sync.vm_has_token || sync.vm_wants_token > 0 {
                    sync.cms_wants_token = true;
                    sync = self.released.wait(sync).unwrap();
                }
                sync.cms_wants_token = false;
                sync.cms_has_token = true;
            }
        }
    }

    fn desynchronize(&self, side: TokenSide) {
        let mut sync = self.sync.lock().unwrap();
        match side {
            TokenSide::Vm => {
                debug_assert!(sync.vm_has_token);
                sync.vm_has_token = false;
            }
            TokenSide::Cms => {
                debug_assert!(sync.cms_has_token);
                sync.cms_has_token = false;
            }
        }
        if sync.vm_wants_token > 0 || sync.cms_wants_token {
            self.released.notify_all();
        }
    }

    /// Whether a VM side thread is waiting for or holding the token.
    pub fn vm_wants_token(&self) -> bool {
        let sync = self.sync.lock().unwrap();
        sync.vm_wants_token > 0 || sync.vm_has_token
    }

    pub fn cms_has_token(&self) -> bool {
        self.sync.lock().unwrap().cms_has_token
    }

    pub fn vm_has_token(&self) -> bool {
        self.sync.lock().unwrap().vm_has_token
    }

    pub fn pending_yields(&self) -> usize {
        self.pending_yields.load(Ordering::Relaxed)
    }

    /// Ask the CMS side to yield until the returned guard is dropped.
    pub fn request_yield(&self) -> YieldRequest<'_> {
        self.pending_yields.fetch_add(1, Ordering::Relaxed);
        YieldRequest { token: self }
    }

    /// Whether the CMS side should yield at its next yield point.
    pub fn should_yield(&self) -> bool {
        self.pending_yields() > 0 || self.vm_wants_token()
    }
}

impl Default for CmsToken {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> TokenGuard<'a> {
    pub fn side(&self) -> TokenSide {
        self.side
    }

    /// Give the token up, wait for the threads that wanted it to be done, and take it back.
    /// Only the CMS side yields.  Waiting for mutators that asked for a yield is bounded by
    /// `max_sleeps` naps of `sleep`; waiting for the VM side is not.
    pub fn yield_token(&mut self, sleep: Duration, max_sleeps: usize) {
        debug_assert_eq!(self.side, TokenSide::Cms);
        self.token.desynchronize(TokenSide::Cms);
        log::trace!("CMS token yielded");
        {
            let mut sync = self.token.sync.lock().unwrap();
            let mut naps = 0;
            while naps < max_sleeps
                && (self.token.pending_yields() > 0
                    || sync.vm_wants_token > 0
                    || sync.vm_has_token)
            {
                sync = self.token.released.wait_timeout(sync, sleep).unwrap().0;
                naps += 1;
            }
        }
        self.token.synchronize(TokenSide::Cms);
        log::trace!("CMS token reacquired");
    }

    /// Run `f` without the token, and take it back afterwards.
    pub fn released<R, F: FnOnce() -> R>(&mut self, f: F) -> R {
        self.token.desynchronize(self.side);
        let r = f();
        self.token.synchronize(self.side);
        r
    }
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.token.desynchronize(self.side);
    }
}

/// Outstanding request for the CMS side to yield.
pub struct YieldRequest<'a> {
    token: &'a CmsToken,
}

impl Drop for YieldRequest<'_> {
    fn drop(&mut self) {
        self.token.pending_yields.fetch_sub(1, Ordering::Relaxed);
    }
}
