//! Single-instance coordination over a local named socket.
//!
//! The first process binds the handoff channel; any process started
//! later sends its argument list through it and exits, so files land in
//! the window the user already has open. When the host configuration
//! disables the feature, neither side touches the channel and multiple
//! processes simply coexist.

pub mod protocol;

pub use protocol::{IpcError, OpenRequest, OpenResponse};

use std::io;
use std::thread::JoinHandle;

use interprocess::local_socket::{
    GenericNamespaced, ListenerNonblockingMode::Neither, ListenerOptions, Name,
    Stream as IpcStream, ToNsName, prelude::*,
};

use protocol::{read_frame, write_frame};

/// Resolves the handoff channel name for this build.
///
/// The base comes from the crate name so a fork that renames the
/// project gets its own channel for free. A `scope` isolates
/// independent setups sharing one machine (test harnesses, portable
/// installs), and debug builds always get a separate channel so a
/// development instance never captures the files of an installed one.
pub fn channel_name(scope: Option<&str>) -> io::Result<Name<'static>> {
    let base = env!("CARGO_PKG_NAME").trim_end_matches("_ipc");
    let mut name = format!("{base}-handoff");
    if let Some(scope) = scope {
        name.push('.');
        name.push_str(scope);
    }
    if cfg!(debug_assertions) {
        name.push_str(".dev");
    }
    name.push_str(".sock");
    name.to_ns_name::<GenericNamespaced>()
}

/// Listens for open-file handoffs from later process instances.
///
/// Dropping the handle detaches the accept thread; it ends when the
/// process exits.
pub struct InstanceListener {
    handle: Option<JoinHandle<()>>,
}

impl InstanceListener {
    /// Binds the handoff channel and spawns the accept loop. A bind
    /// failure usually means another instance already listens; callers
    /// then hand their arguments over with [`send_open_request`].
    pub fn bind(
        scope: Option<&str>,
        on_open: impl Fn(OpenRequest) + Send + 'static,
    ) -> Result<Self, IpcError> {
        let name = channel_name(scope)?;
        let listener = ListenerOptions::new()
            .name(name)
            .nonblocking(Neither)
            .create_sync()?;
        let handle = std::thread::Builder::new()
            .name("instance-listener".to_string())
            .spawn(move || {
                loop {
                    let mut stream = match listener.accept() {
                        Ok(stream) => stream,
                        Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                        Err(error) => {
                            log::error!("handoff channel accept failed: {error}");
                            break;
                        }
                    };
                    match read_frame::<OpenRequest>(&mut stream) {
                        Ok(request) => {
                            log::info!("received open request: {:?}", request.args);
                            let _ = write_frame(&mut stream, &OpenResponse::Accepted);
                            on_open(request);
                        }
                        Err(error) => {
                            log::warn!("discarding bad handoff: {error}");
                            let response = OpenResponse::Rejected { message: error.to_string() };
                            let _ = write_frame(&mut stream, &response);
                        }
                    }
                }
            })?;
        Ok(Self { handle: Some(handle) })
    }
}

impl Drop for InstanceListener {
    fn drop(&mut self) {
        // The accept loop blocks in accept(); the thread is detached and
        // dies with the process.
        if let Some(handle) = self.handle.take() {
            drop(handle);
        }
    }
}

/// Sends the argument list to a running instance. `Ok(false)` means no
/// instance is listening and the caller should proceed on its own.
pub fn send_open_request(scope: Option<&str>, args: &[String]) -> Result<bool, IpcError> {
    let name = channel_name(scope)?;
    let mut stream = match IpcStream::connect(name) {
        Ok(stream) => stream,
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Ok(false);
        }
        Err(error) => return Err(error.into()),
    };
    write_frame(&mut stream, &OpenRequest { args: args.to_vec() })?;
    match read_frame::<OpenResponse>(&mut stream)? {
        OpenResponse::Accepted => Ok(true),
        OpenResponse::Rejected { message } => Err(IpcError::Rejected(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn handoff_reaches_the_first_instance() {
        // A process-scoped channel keeps parallel test runs apart.
        let scope = format!("test-{}", std::process::id());
        let (sender, receiver) = channel();
        let listener = match InstanceListener::bind(Some(&scope), move |request| {
            let _ = sender.send(request.args);
        }) {
            Ok(listener) => listener,
            // Sandboxed environments may forbid local sockets.
            Err(error) => {
                eprintln!("skipping: cannot bind the handoff channel: {error}");
                return;
            }
        };

        let sent = send_open_request(Some(&scope), &["alpha.db".to_string()]).unwrap();
        assert!(sent);
        let args = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(args, vec!["alpha.db".to_string()]);
        drop(listener);
    }

    #[test]
    fn absent_listener_reports_not_running() {
        let scope = format!("nobody-{}", std::process::id());
        match send_open_request(Some(&scope), &[]) {
            Ok(sent) => assert!(!sent),
            // Platforms that surface the miss as another error kind are
            // out of this test's scope.
            Err(error) => eprintln!("skipping: {error}"),
        }
    }
}
