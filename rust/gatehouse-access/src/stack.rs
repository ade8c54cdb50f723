//! The per-thread execution stack.
//!
//! Code entering a protection domain pushes a frame with [`enter`] (or runs
//! a closure with [`run_as`]); the frame is popped when the returned guard
//! is dropped. Privileged calls push a marker frame. Capturing the current
//! context walks the frames from the innermost outwards, collecting domains
//! until it reaches a marker, and otherwise falls through to the context the
//! thread inherited when it was spawned.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::JoinHandle;

use gatehouse_permission::SharedPermission;

use crate::{AccessContext, ProtectionDomain, context::push_unique};

enum Frame {
    Domain(ProtectionDomain),
    Privileged(Marker),
}

struct Marker {
    caller: Option<ProtectionDomain>,
    narrowing: Option<AccessContext>,
    limit: Option<Arc<[SharedPermission]>>,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static INHERITED: RefCell<Option<AccessContext>> = const { RefCell::new(None) };
}

/// Pops the frame pushed by [`enter`] (and anything pushed after it) when
/// dropped. Bound to the thread that created it.
#[must_use = "the domain is left as soon as the guard is dropped"]
pub struct StackGuard {
    depth: usize,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        FRAMES.with_borrow_mut(|frames| frames.truncate(self.depth));
    }
}

fn push(frame: Frame) -> StackGuard {
    FRAMES.with_borrow_mut(|frames| {
        let depth = frames.len();
        frames.push(frame);
        StackGuard {
            depth,
            _thread_bound: PhantomData,
        }
    })
}

/// Execute on behalf of `domain` until the guard is dropped.
pub fn enter(domain: ProtectionDomain) -> StackGuard {
    push(Frame::Domain(domain))
}

/// Run `action` on behalf of `domain`.
pub fn run_as<T>(domain: ProtectionDomain, action: impl FnOnce() -> T) -> T {
    let _guard = enter(domain);
    action()
}

/// The innermost domain on this thread's stack.
pub fn current_domain() -> Option<ProtectionDomain> {
    FRAMES.with_borrow(|frames| {
        frames.iter().rev().find_map(|frame| match frame {
            Frame::Domain(domain) => Some(domain.clone()),
            Frame::Privileged(_) => None,
        })
    })
}

/// The context this thread was spawned with, if it was spawned through
/// [`spawn`] or [`spawn_with_context`].
pub fn inherited_context() -> Option<AccessContext> {
    INHERITED.with_borrow(Clone::clone)
}

pub(crate) fn run_privileged<T>(
    narrowing: Option<AccessContext>,
    limit: Option<Arc<[SharedPermission]>>,
    action: impl FnOnce() -> T,
) -> T {
    let _guard = push(Frame::Privileged(Marker {
        caller: current_domain(),
        narrowing,
        limit,
    }));
    action()
}

/// The domains on the stack up to the first privileged marker, without
/// folding in the inherited context.
pub(crate) fn capture_stack() -> AccessContext {
    let inherited = inherited_context();
    FRAMES.with_borrow(|frames| capture_frames(frames, inherited.as_ref()))
}

/// Capture the effective context of the current thread.
pub fn capture() -> AccessContext {
    let inherited = inherited_context();
    FRAMES
        .with_borrow(|frames| capture_frames(frames, inherited.as_ref()))
        .optimize(inherited.as_ref())
}

fn capture_frames(frames: &[Frame], inherited: Option<&AccessContext>) -> AccessContext {
    let mut domains = Vec::new();
    for (index, frame) in frames.iter().enumerate().rev() {
        match frame {
            Frame::Domain(domain) => push_unique(&mut domains, domain),
            Frame::Privileged(marker) => {
                if let Some(caller) = &marker.caller {
                    push_unique(&mut domains, caller);
                }
                return match &marker.limit {
                    None => AccessContext::captured(domains, true, marker.narrowing.clone()),
                    Some(permissions) => {
                        let parent =
                            capture_frames(&frames[..index], inherited).optimize(inherited);
                        AccessContext::limited(
                            domains,
                            permissions.clone(),
                            marker.narrowing.clone(),
                            parent,
                        )
                    }
                };
            }
        }
    }
    AccessContext::captured(domains, false, None)
}

/// Spawn a thread that inherits the current context.
pub fn spawn<F, T>(action: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_with_context(capture(), action)
}

/// Spawn a thread that inherits `context`. The child starts with an empty
/// stack, so its checks are decided by `context` until it enters a domain.
pub fn spawn_with_context<F, T>(context: AccessContext, action: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::spawn(move || {
        INHERITED.set(Some(context));
        action()
    })
}
