//! Control socket boundary
//!
//! The control-socket listener lives outside the frontend. The dispatcher
//! hands it the listening descriptor and relays control replies from the
//! engine through [`ControlRelay`].

use crate::error::FrontendResult;
use crate::imsg::Imsg;
use std::os::fd::OwnedFd;
use tracing::debug;

pub trait ControlRelay {
    /// Take over the listening control socket.
    fn listen(&mut self, fd: OwnedFd) -> FrontendResult<()>;
    /// Pass a control reply on to the connected client.
    fn relay(&mut self, imsg: &Imsg);
}

/// Relay used when no control listener is configured: the socket is
/// closed and replies are dropped.
#[derive(Debug, Default)]
pub struct DisabledControl;

impl ControlRelay for DisabledControl {
    fn listen(&mut self, fd: OwnedFd) -> FrontendResult<()> {
        debug!("no control listener, closing control socket");
        drop(fd);
        Ok(())
    }

    fn relay(&mut self, imsg: &Imsg) {
        debug!("dropping control reply of type {}", imsg.kind);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Relay that remembers what it was given. Clones share state, so a
    /// test can keep one and box the other.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct RecordingControl {
        pub(crate) listening: Arc<Mutex<Option<OwnedFd>>>,
        pub(crate) relayed: Arc<Mutex<Vec<u32>>>,
    }

    impl ControlRelay for RecordingControl {
        fn listen(&mut self, fd: OwnedFd) -> FrontendResult<()> {
            *self.listening.lock().unwrap() = Some(fd);
            Ok(())
        }

        fn relay(&mut self, imsg: &Imsg) {
            self.relayed.lock().unwrap().push(imsg.kind);
        }
    }

    #[test]
    fn test_disabled_control_closes_socket() {
        use std::io::Read;
        use std::os::unix::net::UnixStream;

        let (ours, mut theirs) = UnixStream::pair().unwrap();
        DisabledControl.listen(OwnedFd::from(ours)).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(theirs.read(&mut buf).unwrap(), 0);
    }
}
