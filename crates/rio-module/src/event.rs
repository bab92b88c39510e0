//! `WaitEvent` — default `Waitable` implementation.
//!
//! - Linux/Android: an eventfd. Signal writes 1, wait polls then reads the
//!   counter back to zero (auto-reset). Multiple signals before a wait
//!   coalesce into one wakeup.
//! - Windows: an auto-reset Win32 event.
//!
//! A completion queue only needs the raw handle; the emulated provider
//! signals it through `signal_raw`/`reset_raw`.

use std::time::Duration;

use rio_core::entry::RawEvent;
use rio_core::error::Result;
use rio_core::waitable::Waitable;

pub struct WaitEvent {
    raw: RawEvent,
    owned: bool, // true if we created the handle (must close on drop)
}

impl WaitEvent {
    /// Create a new event. The `WaitEvent` owns it and closes it on drop.
    pub fn create() -> Result<Self> {
        let raw = sys::create()?;
        Ok(Self { raw, owned: true })
    }

    /// Wrap a caller-owned handle. It is NOT closed on drop.
    ///
    /// # Safety
    /// `raw` must be a valid event handle (eventfd on Unix) that outlives
    /// this value.
    pub unsafe fn from_raw(raw: RawEvent) -> Self {
        Self { raw, owned: false }
    }

    pub fn signal(&self) -> Result<()> {
        signal_raw(self.raw)
    }

    pub fn reset(&self) -> Result<()> {
        reset_raw(self.raw)
    }
}

impl Waitable for WaitEvent {
    fn raw_event(&self) -> RawEvent {
        self.raw
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        sys::wait(self.raw, timeout)
    }
}

impl Drop for WaitEvent {
    fn drop(&mut self) {
        if self.owned {
            sys::close(self.raw);
        }
    }
}

/// Signal an event by handle.
pub fn signal_raw(raw: RawEvent) -> Result<()> {
    sys::signal(raw)
}

/// Clear a pending signal by handle. Clearing an unsignalled event is a no-op.
pub fn reset_raw(raw: RawEvent) -> Result<()> {
    sys::reset(raw)
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod sys {
            use std::time::Duration;

            use nix::errno::Errno;
            use rio_core::entry::RawEvent;
            use rio_core::error::{Result, RioError};

            fn fd(raw: RawEvent) -> libc::c_int {
                raw.0 as libc::c_int
            }

            pub fn create() -> Result<RawEvent> {
                let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
                if fd < 0 {
                    return Err(RioError::Os(Errno::last() as i32));
                }
                Ok(RawEvent(fd as usize))
            }

            pub fn close(raw: RawEvent) {
                unsafe {
                    libc::close(fd(raw));
                }
            }

            pub fn signal(raw: RawEvent) -> Result<()> {
                let val: u64 = 1;
                let ret = unsafe {
                    libc::write(
                        fd(raw),
                        &val as *const u64 as *const libc::c_void,
                        std::mem::size_of::<u64>(),
                    )
                };
                if ret < 0 {
                    let err = Errno::last();
                    // Counter would overflow: a signal is already pending.
                    if err == Errno::EAGAIN {
                        return Ok(());
                    }
                    return Err(RioError::Os(err as i32));
                }
                Ok(())
            }

            /// Drain the counter. Returns whether a signal was pending.
            fn consume(raw: RawEvent) -> Result<bool> {
                let mut val: u64 = 0;
                let ret = unsafe {
                    libc::read(
                        fd(raw),
                        &mut val as *mut u64 as *mut libc::c_void,
                        std::mem::size_of::<u64>(),
                    )
                };
                if ret < 0 {
                    let err = Errno::last();
                    if err == Errno::EAGAIN {
                        return Ok(false);
                    }
                    return Err(RioError::Os(err as i32));
                }
                Ok(true)
            }

            pub fn reset(raw: RawEvent) -> Result<()> {
                consume(raw).map(|_| ())
            }

            pub fn wait(raw: RawEvent, timeout: Option<Duration>) -> Result<bool> {
                let timeout_ms = match timeout {
                    Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
                    None => -1,
                };
                let mut pfd = libc::pollfd {
                    fd: fd(raw),
                    events: libc::POLLIN,
                    revents: 0,
                };
                loop {
                    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
                    if ret < 0 {
                        let err = Errno::last();
                        if err == Errno::EINTR {
                            continue;
                        }
                        return Err(RioError::Os(err as i32));
                    }
                    if ret == 0 {
                        return Ok(false);
                    }
                    return consume(raw);
                }
            }
        }
    } else if #[cfg(windows)] {
        mod sys {
            use std::time::Duration;

            use rio_core::entry::RawEvent;
            use rio_core::error::{Result, RioError};
            use windows_sys::Win32::Foundation::{CloseHandle, GetLastError};
            use windows_sys::Win32::System::Threading::{
                CreateEventW, ResetEvent, SetEvent, WaitForSingleObject,
            };

            const WAIT_OBJECT_0: u32 = 0;
            const WAIT_TIMEOUT: u32 = 0x102;
            const INFINITE: u32 = 0xFFFF_FFFF;

            fn last_error() -> RioError {
                RioError::Os(unsafe { GetLastError() } as i32)
            }

            pub fn create() -> Result<RawEvent> {
                // Auto-reset, initially unsignalled, unnamed.
                let handle = unsafe { CreateEventW(std::ptr::null(), 0, 0, std::ptr::null()) };
                if handle as usize == 0 {
                    return Err(last_error());
                }
                Ok(RawEvent(handle as usize))
            }

            pub fn close(raw: RawEvent) {
                unsafe {
                    CloseHandle(raw.0 as _);
                }
            }

            pub fn signal(raw: RawEvent) -> Result<()> {
                if unsafe { SetEvent(raw.0 as _) } == 0 {
                    return Err(last_error());
                }
                Ok(())
            }

            pub fn reset(raw: RawEvent) -> Result<()> {
                if unsafe { ResetEvent(raw.0 as _) } == 0 {
                    return Err(last_error());
                }
                Ok(())
            }

            pub fn wait(raw: RawEvent, timeout: Option<Duration>) -> Result<bool> {
                let ms = match timeout {
                    Some(d) => d.as_millis().min((INFINITE - 1) as u128) as u32,
                    None => INFINITE,
                };
                match unsafe { WaitForSingleObject(raw.0 as _, ms) } {
                    WAIT_OBJECT_0 => Ok(true),
                    WAIT_TIMEOUT => Ok(false),
                    _ => Err(last_error()),
                }
            }
        }
    } else {
        mod sys {
            use std::time::Duration;

            use rio_core::entry::RawEvent;
            use rio_core::error::{status, Result, RioError};

            const UNSUPPORTED: RioError = RioError::Os(status::WSAEOPNOTSUPP);

            pub fn create() -> Result<RawEvent> {
                Err(UNSUPPORTED)
            }

            pub fn close(_raw: RawEvent) {}

            pub fn signal(_raw: RawEvent) -> Result<()> {
                Err(UNSUPPORTED)
            }

            pub fn reset(_raw: RawEvent) -> Result<()> {
                Err(UNSUPPORTED)
            }

            pub fn wait(_raw: RawEvent, _timeout: Option<Duration>) -> Result<bool> {
                Err(UNSUPPORTED)
            }
        }
    }
}
