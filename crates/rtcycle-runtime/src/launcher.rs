//! Real-time worker launch through raw pthread attributes.
//!
//! `std::thread::Builder` cannot request an explicit scheduling policy, so
//! workers are created with `pthread_create` and an attribute object carrying
//! stack size, policy, priority and `PTHREAD_EXPLICIT_SCHED`. The closure is
//! boxed and handed to an `extern "C"` trampoline; its result (or panic) comes
//! back through `pthread_join`.

use rtcycle_common::config::{SchedPolicy, WorkerConfig};
use rtcycle_common::error::{LaunchStep, OsErrno, RtError, RtResult};
use std::any::Any;
use std::ffi::{c_int, c_void, CString};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{debug, warn};

/// glibc and musl both define `PTHREAD_EXPLICIT_SCHED` as 1.
const PTHREAD_EXPLICIT_SCHED: c_int = 1;

/// Kernel limit on thread names, excluding the NUL terminator.
const THREAD_NAME_MAX: usize = 15;

extern "C" {
    fn pthread_attr_setinheritsched(attr: *mut libc::pthread_attr_t, inherit: c_int) -> c_int;
    fn pthread_attr_setschedpolicy(attr: *mut libc::pthread_attr_t, policy: c_int) -> c_int;
    fn pthread_attr_setschedparam(
        attr: *mut libc::pthread_attr_t,
        param: *const libc::sched_param,
    ) -> c_int;
}

fn linux_policy(policy: SchedPolicy) -> c_int {
    match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => libc::SCHED_OTHER,
    }
}

fn check(step: LaunchStep, rc: c_int) -> RtResult<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(RtError::Launch {
            step,
            errno: OsErrno(rc),
        })
    }
}

/// Initialized `pthread_attr_t`, destroyed on drop.
struct ThreadAttr {
    attr: libc::pthread_attr_t,
}

impl ThreadAttr {
    fn new() -> RtResult<Self> {
        let mut attr = MaybeUninit::<libc::pthread_attr_t>::uninit();
        // SAFETY: pthread_attr_init initializes the pointee.
        check(LaunchStep::Attributes, unsafe {
            libc::pthread_attr_init(attr.as_mut_ptr())
        })?;
        // SAFETY: initialized by the successful call above.
        Ok(Self {
            attr: unsafe { attr.assume_init() },
        })
    }

    fn configure(&mut self, config: &WorkerConfig) -> RtResult<()> {
        let attr = &mut self.attr as *mut libc::pthread_attr_t;
        let param = libc::sched_param {
            sched_priority: c_int::from(config.effective_priority()),
        };

        // SAFETY: `attr` is initialized and exclusively borrowed.
        unsafe {
            check(
                LaunchStep::StackSize,
                libc::pthread_attr_setstacksize(attr, config.stack_size),
            )?;
            check(
                LaunchStep::Policy,
                pthread_attr_setschedpolicy(attr, linux_policy(config.policy)),
            )?;
            check(
                LaunchStep::Priority,
                pthread_attr_setschedparam(attr, &param),
            )?;
            check(
                LaunchStep::Inheritance,
                pthread_attr_setinheritsched(attr, PTHREAD_EXPLICIT_SCHED),
            )?;
        }
        Ok(())
    }
}

impl Drop for ThreadAttr {
    fn drop(&mut self) {
        // SAFETY: initialized in `new` and destroyed exactly once.
        unsafe {
            libc::pthread_attr_destroy(&mut self.attr);
        }
    }
}

extern "C" fn trampoline<F, R>(arg: *mut c_void) -> *mut c_void
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    // SAFETY: `arg` is the `Box<F>` leaked by `WorkerLauncher::launch`, and
    // this is its only consumer.
    let entry = unsafe { Box::from_raw(arg.cast::<F>()) };
    let result: thread::Result<R> = panic::catch_unwind(AssertUnwindSafe(move || entry()));
    Box::into_raw(Box::new(result)).cast()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Creates worker threads with the configured real-time attributes.
#[derive(Debug)]
pub struct WorkerLauncher {
    config: WorkerConfig,
    launched: usize,
}

impl WorkerLauncher {
    /// Launcher applying `config` to every worker.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            launched: 0,
        }
    }

    /// Attributes applied at launch.
    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Number of workers successfully created so far.
    #[must_use]
    pub fn launched(&self) -> usize {
        self.launched
    }

    /// Create a thread named `name` running `entry` under the configured
    /// policy, priority and stack size.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Launch`] naming the attribute step (or creation)
    /// that failed. Without `CAP_SYS_NICE` a real-time policy fails at
    /// [`LaunchStep::Create`] with `EPERM`.
    pub fn launch<F, R>(&mut self, name: &str, entry: F) -> RtResult<WorkerHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut attr = ThreadAttr::new()?;
        attr.configure(&self.config)?;

        let payload = Box::into_raw(Box::new(entry)).cast::<c_void>();
        let mut thread = MaybeUninit::<libc::pthread_t>::uninit();

        // SAFETY: attr is configured; the trampoline takes ownership of the
        // payload only if creation succeeds.
        let rc = unsafe {
            libc::pthread_create(
                thread.as_mut_ptr(),
                &attr.attr,
                trampoline::<F, R>,
                payload,
            )
        };
        if rc != 0 {
            // SAFETY: the thread was not created, so the payload is still ours.
            drop(unsafe { Box::from_raw(payload.cast::<F>()) });
            return Err(RtError::Launch {
                step: LaunchStep::Create,
                errno: OsErrno(rc),
            });
        }
        // SAFETY: pthread_create succeeded and wrote the id.
        let thread = unsafe { thread.assume_init() };

        set_thread_name(thread, name);
        self.launched += 1;

        debug!(
            worker = name,
            policy = ?self.config.policy,
            priority = self.config.effective_priority(),
            stack_size = self.config.stack_size,
            "Worker launched"
        );

        Ok(WorkerHandle {
            thread: Some(thread),
            name: name.to_string(),
            _result: PhantomData,
        })
    }
}

/// Starts workers. [`WorkerLauncher`] is the pthread implementation; the
/// coordinator only depends on this seam.
pub trait Launch {
    /// Start `entry` on a new worker named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Launch`] if the worker could not be started.
    fn launch<F, R>(&mut self, name: &str, entry: F) -> RtResult<WorkerHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static;
}

impl Launch for WorkerLauncher {
    fn launch<F, R>(&mut self, name: &str, entry: F) -> RtResult<WorkerHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        WorkerLauncher::launch(self, name, entry)
    }
}

fn set_thread_name(thread: libc::pthread_t, name: &str) {
    let truncated: String = name.chars().take(THREAD_NAME_MAX).collect();
    let Ok(cname) = CString::new(truncated) else {
        return;
    };
    // SAFETY: `thread` is a live thread and `cname` is NUL-terminated.
    let rc = unsafe { libc::pthread_setname_np(thread, cname.as_ptr()) };
    if rc != 0 {
        debug!(worker = name, rc, "Could not set thread name");
    }
}

/// Joinable handle to a launched worker. Dropping it detaches the thread.
#[derive(Debug)]
pub struct WorkerHandle<R> {
    thread: Option<libc::pthread_t>,
    name: String,
    _result: PhantomData<fn() -> R>,
}

impl<R> WorkerHandle<R> {
    /// Worker name given at launch.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the worker to terminate and take its result.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Join`] if `pthread_join` fails or the worker
    /// panicked.
    pub fn join(mut self) -> RtResult<R> {
        let Some(thread) = self.thread.take() else {
            return Err(RtError::Join {
                worker: self.name.clone(),
                reason: "already joined".into(),
                errno: None,
            });
        };

        let mut ret: *mut c_void = std::ptr::null_mut();
        // SAFETY: `thread` was created joinable and is joined at most once.
        let rc = unsafe { libc::pthread_join(thread, &mut ret) };
        if rc != 0 {
            return Err(RtError::Join {
                worker: self.name.clone(),
                reason: "pthread_join failed".into(),
                errno: Some(OsErrno(rc)),
            });
        }

        // SAFETY: the trampoline returned a leaked `Box<thread::Result<R>>`.
        let result = unsafe { Box::from_raw(ret.cast::<thread::Result<R>>()) };
        (*result).map_err(|payload| RtError::Join {
            worker: self.name.clone(),
            reason: format!("worker panicked: {}", panic_message(payload.as_ref())),
            errno: None,
        })
    }
}

impl<R> Drop for WorkerHandle<R> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            warn!(worker = %self.name, "Worker handle dropped without join, detaching");
            // SAFETY: `thread` is joinable and has not been joined or detached.
            unsafe {
                libc::pthread_detach(thread);
            }
        }
    }
}
