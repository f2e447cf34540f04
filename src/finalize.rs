//! The response-finalization hook point.
//!
//! Every request owns one [`Finalizer`]. The server calls
//! [`Finalizer::finalize`] exactly once per request, after the error handler
//! and immediately before the response is handed to hyper. Past that point
//! nothing can change the bytes on the wire.
//!
//! Middleware that needs to observe the final response wraps the current
//! finalize function with its own, closing over whatever it captured on the
//! way in, and delegates to the previous function with the response
//! unmodified:
//!
//! ```rust
//! # use rapport::{Request, Response};
//! # fn example(req: &Request) {
//! let started = std::time::Instant::now();
//! req.finalizer().wrap("timing", move |response, previous| {
//!     println!("{} after {:?}", response.status_code(), started.elapsed());
//!     previous(response)
//! });
//! # }
//! ```

use parking_lot::Mutex;

use crate::response::Response;

/// A finalize function: takes the outgoing response, returns the response to
/// send.
pub type Finalize = Box<dyn FnOnce(Response) -> Response + Send + 'static>;

/// Per-request holder of the (possibly wrapped) finalize function.
pub struct Finalizer {
    state: Mutex<State>,
}

struct State {
    /// `None` once finalized.
    end: Option<Finalize>,
    /// Tags of the wrappers already installed.
    wrapped: Vec<&'static str>,
}

impl Finalizer {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                end: Some(Box::new(|response: Response| response)),
                wrapped: Vec::new(),
            }),
        }
    }

    /// Wraps the current finalize function with `hook`.
    ///
    /// `hook` receives the outgoing response and the previous finalize
    /// function; it must call the latter and return its result. Wrapping is
    /// idempotent per `tag`: a second wrap with a tag already installed is
    /// ignored. Returns whether the hook was installed, which is also `false`
    /// once the response has been finalized.
    pub fn wrap<F>(&self, tag: &'static str, hook: F) -> bool
    where
        F: FnOnce(Response, Finalize) -> Response + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.wrapped.contains(&tag) {
            return false;
        }
        let Some(previous) = state.end.take() else {
            return false;
        };
        state.wrapped.push(tag);
        state.end = Some(Box::new(move |response: Response| hook(response, previous)));
        true
    }

    /// Runs the finalize chain on `response`.
    ///
    /// Only the first call runs the hooks; later calls return the response
    /// untouched.
    pub fn finalize(&self, response: Response) -> Response {
        // Release the lock before running hooks: they log, and may touch the
        // request again.
        let end = self.state.lock().end.take();
        match end {
            Some(end) => end(response),
            None => response,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().end.is_none()
    }
}
