use std::{ops, sync};

/// Shared session state: an Arc/Mutex with the locking noise tucked away.
///
/// Guards are only held for short critical sections, never across an await.
pub struct Lock<T> {
	inner: sync::Arc<sync::Mutex<T>>,
}

impl<T> Lock<T> {
	pub fn new(value: T) -> Self {
		Self {
			inner: sync::Arc::new(sync::Mutex::new(value)),
		}
	}

	pub fn lock(&self) -> LockGuard<T> {
		// A poisoned mutex means a holder panicked mid-update; the session is
		// torn down on panic anyway, so keep serving the state as it was.
		let inner = match self.inner.lock() {
			Ok(guard) => guard,
			Err(poisoned) => {
				tracing::warn!("session state lock poisoned");
				poisoned.into_inner()
			}
		};

		LockGuard { inner }
	}
}

impl<T: Default> Default for Lock<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T> Clone for Lock<T> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

pub struct LockGuard<'a, T> {
	inner: sync::MutexGuard<'a, T>,
}

impl<'a, T> ops::Deref for LockGuard<'a, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.inner
	}
}

impl<'a, T> ops::DerefMut for LockGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.inner
	}
}
