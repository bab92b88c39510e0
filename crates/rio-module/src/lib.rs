//! # rio-module — Default implementations
//!
//! Providers of the `RioExtension` table plus the owning handles that
//! enforce the registered-I/O lifetime rules on top of any provider.
//!
//! ## Providers
//!
//! | Provider      | Where                | Source of the table                        |
//! |---------------|----------------------|--------------------------------------------|
//! | `WinsockRio`  | Windows              | `SIO_GET_MULTIPLE_EXTENSION_FUNCTION_POINTER` |
//! | `EmulatedRio` | everywhere           | in-process state, same observable protocol |
//!
//! ## Ownership tree
//!
//! ```text
//! RequestQueue ──owns──▶ socket
//!      │
//!      └──Arc──▶ CompletionQueue ──Arc──▶ Waitable
//!
//! RegisteredBuffer ──owns──▶ backing memory
//! ```
//!
//! Dropping the tree from the top tears down in the order the platform
//! requires: socket (destroys the request queue), then completion queue,
//! then the event. Buffers deregister before their memory is freed.

pub mod winsock_sys;
pub mod resolver;
pub mod event;
pub mod emulated;
pub mod buffer;
pub mod completion_queue;
pub mod request_queue;
pub mod instance;

#[cfg(windows)]
pub mod winsock;
