use std::collections::VecDeque;

use tokio::sync::oneshot;

/// FIFO of parked acquirers with one-shot grant permits.
///
/// This is the arrival-queue / permission-channel pair behind every contended
/// key: a blocking acquire parks by pushing a permit sender and awaiting the
/// receiver; a release pops the front sender and fires it. Fairness falls out
/// of the queue order. The caller is responsible for marking the key slot
/// reserved between firing a permit and the woken acquirer installing itself,
/// so a try-lock cannot steal the handoff window.
#[derive(Debug, Default)]
pub(crate) struct WaitList {
	queue: VecDeque<oneshot::Sender<()>>,
}

impl WaitList {
	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	/// Parks the caller: returns the receiver to await a grant permit on.
	pub fn park(&mut self) -> oneshot::Receiver<()> {
		let (tx, rx) = oneshot::channel();
		self.queue.push_back(tx);
		rx
	}

	/// Grants the lock to the first live waiter, in arrival order.
	/// Returns false when nobody was waiting.
	pub fn wake_one(&mut self) -> bool {
		while let Some(tx) = self.queue.pop_front() {
			if tx.send(()).is_ok() {
				return true;
			}
			// receiver vanished; fall through to the next in line
		}
		false
	}

	/// Grants every parked waiter at once (read batch admission).
	/// Returns how many were actually woken.
	pub fn wake_all(&mut self) -> usize {
		let mut woken = 0;
		while let Some(tx) = self.queue.pop_front() {
			if tx.send(()).is_ok() {
				woken += 1;
			}
		}
		woken
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn wakes_in_arrival_order() {
		let mut list = WaitList::default();
		let mut first = list.park();
		let mut second = list.park();
		assert!(list.wake_one());
		assert!(first.try_recv().is_ok());
		assert!(second.try_recv().is_err());
		assert!(list.wake_one());
		assert!(second.try_recv().is_ok());
		assert!(!list.wake_one());
	}

	#[tokio::test]
	async fn skips_abandoned_waiters() {
		let mut list = WaitList::default();
		drop(list.park());
		let mut live = list.park();
		assert!(list.wake_one());
		assert!(live.try_recv().is_ok());
	}

	#[tokio::test]
	async fn wake_all_drains_the_queue() {
		let mut list = WaitList::default();
		let rxs: Vec<_> = (0..3).map(|_| list.park()).collect();
		assert_eq!(list.wake_all(), 3);
		assert!(list.is_empty());
		for mut rx in rxs {
			assert!(rx.try_recv().is_ok());
		}
	}
}
