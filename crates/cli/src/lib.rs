//! Batch mover and command helpers behind the `commessa-router` binary.
pub mod apply;
pub mod fs_apply;
pub mod paths;
