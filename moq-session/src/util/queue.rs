use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Notify;

use super::Lock;

/// An unbounded queue between the session loops and the application.
pub struct Queue<T> {
	state: Lock<VecDeque<T>>,
	notify: Arc<Notify>,
}

impl<T> Clone for Queue<T> {
	fn clone(&self) -> Self {
		Self {
			state: self.state.clone(),
			notify: self.notify.clone(),
		}
	}
}

impl<T> Default for Queue<T> {
	fn default() -> Self {
		Self {
			state: Default::default(),
			notify: Default::default(),
		}
	}
}

impl<T> Queue<T> {
	pub fn push(&self, item: T) {
		self.state.lock().push_back(item);
		self.notify.notify_one();
	}

	pub async fn pop(&self) -> T {
		loop {
			if let Some(item) = self.state.lock().pop_front() {
				return item;
			}

			self.notify.notified().await;
		}
	}
}
