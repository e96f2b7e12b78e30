//! In-process transport: one thread per rank, per-pair channels.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use super::{Communicator, Tag};
use crate::error::{Error, Result};

/// How long a receive may wait before the run is declared wedged. The
/// schedule is deadlock-free by construction, so a timeout here means a bug,
/// not congestion.
const RECV_TIMEOUT: Duration = Duration::from_secs(120);

type Message<T> = (Tag, Vec<T>);

/// One rank's endpoint of an in-process process group.
///
/// Each ordered pair of ranks gets its own unbounded channel, which gives the
/// two guarantees the engine relies on: sends complete immediately, and
/// messages between a pair arrive in the order they were sent.
///
/// # Example
///
/// ```
/// use cosma::comm::{Communicator, ThreadComm};
///
/// let sums = ThreadComm::<f64>::run(2, |comm| {
///     if comm.rank() == 0 {
///         comm.send(1, 7, vec![1.0, 2.0]).unwrap();
///         0.0
///     } else {
///         comm.recv(0, 7).unwrap().iter().sum()
///     }
/// });
/// assert_eq!(sums, vec![0.0, 3.0]);
/// ```
pub struct ThreadComm<T> {
    rank: usize,
    size: usize,
    /// Sender for each destination rank (the `me -> dest` channel).
    to: Vec<Sender<Message<T>>>,
    /// Receiver for each source rank (the `src -> me` channel).
    from: Vec<Receiver<Message<T>>>,
}

impl<T: Send + 'static> ThreadComm<T> {
    /// Builds the endpoints of a `size`-rank group.
    pub fn endpoints(size: usize) -> Vec<ThreadComm<T>> {
        assert!(size > 0, "group needs at least one rank");
        let mut senders: Vec<Vec<Sender<Message<T>>>> = (0..size).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Receiver<Message<T>>>> =
            (0..size).map(|_| Vec::new()).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = channel();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }
        // receivers[dst] was filled in src-major order across the outer loop,
        // which leaves exactly one receiver per source, in rank order.
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (to, from))| ThreadComm {
                rank,
                size,
                to,
                from,
            })
            .collect()
    }

    /// Runs `body` on `size` ranks, one thread each, and returns the results
    /// in rank order.
    pub fn run<R, F>(size: usize, body: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(ThreadComm<T>) -> R + Send + Sync,
    {
        let endpoints = Self::endpoints(size);
        let body = &body;
        std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|comm| scope.spawn(move || body(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }
}

impl<T: Send + 'static> Communicator<T> for ThreadComm<T> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, tag: Tag, payload: Vec<T>) -> Result<()> {
        if dest >= self.size {
            return Err(Error::Transport(format!(
                "destination rank {dest} outside group of {}",
                self.size
            )));
        }
        self.to[dest]
            .send((tag, payload))
            .map_err(|_| Error::Transport(format!("rank {dest} has shut down")))
    }

    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<T>> {
        if src >= self.size {
            return Err(Error::Transport(format!(
                "source rank {src} outside group of {}",
                self.size
            )));
        }
        let (got_tag, payload) = self.from[src]
            .recv_timeout(RECV_TIMEOUT)
            .map_err(|e| Error::Transport(format!("receive from rank {src} failed: {e}")))?;
        if got_tag != tag {
            return Err(Error::Transport(format!(
                "rank {} expected tag {tag:#x} from rank {src}, got {got_tag:#x}",
                self.rank
            )));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_order_is_preserved() {
        let results = ThreadComm::<u32>::run(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 1, vec![10]).unwrap();
                comm.send(1, 2, vec![20]).unwrap();
                Vec::new()
            } else {
                let first = comm.recv(0, 1).unwrap();
                let second = comm.recv(0, 2).unwrap();
                vec![first[0], second[0]]
            }
        });
        assert_eq!(results[1], vec![10, 20]);
    }

    #[test]
    fn all_to_all_exchange() {
        // Every rank sends its rank number to everyone else.
        let results = ThreadComm::<usize>::run(4, |comm| {
            let me = comm.rank();
            for dst in 0..comm.size() {
                if dst != me {
                    comm.send(dst, 9, vec![me]).unwrap();
                }
            }
            let mut got = Vec::new();
            for src in 0..comm.size() {
                if src != me {
                    got.push(comm.recv(src, 9).unwrap()[0]);
                }
            }
            got
        });
        assert_eq!(results[0], vec![1, 2, 3]);
        assert_eq!(results[2], vec![0, 1, 3]);
    }

    #[test]
    fn tag_mismatch_is_a_protocol_error() {
        let results = ThreadComm::<u8>::run(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 5, vec![1]).unwrap();
                true
            } else {
                comm.recv(0, 6).is_err()
            }
        });
        assert!(results[1]);
    }
}
