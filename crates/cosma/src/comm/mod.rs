//! The message transport the engine drives.
//!
//! The engine needs very little from a transport: tagged, reliable, ordered
//! point-to-point delivery of element buffers within a fixed group of
//! processes. Collective patterns (the cross-peer allgather of a parallel
//! step, the reduce-scatter of a parallel-K unwind, the all-to-all of layout
//! translation) are built in library code on top of [`Communicator`], so any
//! backend that implements the trait runs the full schedule unchanged.
//!
//! [`ThreadComm`] is the bundled backend: one OS thread per rank connected by
//! per-pair channels. It exists for tests, benches and single-node runs; an
//! MPI binding would implement the same trait over `MPI_Send`/`MPI_Recv`.
//!
//! Because every rank traverses the same schedule in the same order, each
//! (source, destination) pair sees a deterministic message sequence; tags are
//! a protocol check, not a routing mechanism.

mod thread;

pub use thread::ThreadComm;

use crate::error::{Error, Result};

/// Message tag: identifies the schedule point a message belongs to.
pub type Tag = u64;

/// Builds a tag from a schedule level, a matrix code and a phase code.
pub fn tag_for(level: usize, matrix: u8, phase: u8) -> Tag {
    ((level as u64) << 16) | ((matrix as u64) << 8) | phase as u64
}

/// Tagged, ordered, reliable point-to-point messaging within a process group.
pub trait Communicator<T: Send + 'static> {
    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Sends `payload` to `dest`. Sends are buffered: they complete without
    /// waiting for the receiver.
    fn send(&self, dest: usize, tag: Tag, payload: Vec<T>) -> Result<()>;

    /// Receives the next message from `src`, which must carry `tag`;
    /// a different tag means the two ranks disagree about the schedule.
    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<T>>;
}

/// The trivial single-process group.
///
/// A single rank never communicates; any send or receive is a schedule bug.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfComm;

impl<T: Send + 'static> Communicator<T> for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _tag: Tag, _payload: Vec<T>) -> Result<()> {
        Err(Error::Transport(format!(
            "single-process group cannot send to rank {dest}"
        )))
    }

    fn recv(&self, src: usize, _tag: Tag) -> Result<Vec<T>> {
        Err(Error::Transport(format!(
            "single-process group cannot receive from rank {src}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_separate_schedule_points() {
        let a = tag_for(3, 0, 1);
        let b = tag_for(3, 1, 1);
        let c = tag_for(4, 0, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn self_comm_refuses_messaging() {
        let comm = SelfComm;
        assert_eq!(Communicator::<f64>::size(&comm), 1);
        assert!(comm.send(0, 0, vec![1.0f64]).is_err());
        assert!(Communicator::<f64>::recv(&comm, 0, 0).is_err());
    }
}
