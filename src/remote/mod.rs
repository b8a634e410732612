mod control;
mod recorder;
mod uri;

pub use control::{
    uri_to_remote, LircRemote, NullRemote, RemoteControl, TestPatternRemote, VirtualRemote,
    MAX_TEST_PATTERN,
};
pub use recorder::{
    file_remote_recorder, lirc_remote_listen, uri_to_remote_recorder, KeyStream,
    VirtualRemoteListener, STDIN_PATH,
};
pub use uri::{ControlUri, RecorderUri};
