// SPDX-License-Identifier: Apache-2.0

//! Ephemeral port reservation for plugin launches.
//!
//! Plugin startup has an inherent TOCTOU window: the host picks a port and
//! tells the child to bind it, and nothing stops a third party from taking
//! the port in between. Holding the reserving listener open until just
//! before spawn shrinks that window to the hand-off itself; the launcher
//! retries the rare remaining collision.

use crate::error::{Error, Result};
use std::{collections::HashMap, net::TcpListener};
use tokio::sync::Mutex;

/// Owns every live port reservation, keyed by port, behind one mutex.
#[derive(Debug, Default)]
pub struct PortAllocator {
	reservations: Mutex<HashMap<u16, TcpListener>>,
}

impl PortAllocator {
	pub fn new() -> Self {
		PortAllocator {
			reservations: Mutex::new(HashMap::new()),
		}
	}

	/// Bind a listener to `127.0.0.1:0`, record it under its OS-assigned
	/// port, and return the port. The listener stays open until
	/// [`release`](Self::release) so no other process can win the port.
	pub async fn reserve(&self) -> Result<u16> {
		let listener = TcpListener::bind("127.0.0.1:0").map_err(Error::PortReservation)?;
		let port = listener
			.local_addr()
			.map_err(Error::PortReservation)?
			.port();

		let mut reservations = self.reservations.lock().await;
		reservations.insert(port, listener);

		log::trace!("reserved port {}", port);
		Ok(port)
	}

	/// Close the reservation for `port`. Each reservation must be released
	/// exactly once; releasing an unknown port is an error.
	pub async fn release(&self, port: u16) -> Result<()> {
		let mut reservations = self.reservations.lock().await;
		match reservations.remove(&port) {
			Some(listener) => {
				drop(listener);
				log::trace!("released port {}", port);
				Ok(())
			}
			None => Err(Error::NoSuchPort { port }),
		}
	}

	/// Drop every outstanding reservation. Used on shutdown paths where
	/// individual ownership no longer matters.
	pub async fn release_all(&self) {
		let mut reservations = self.reservations.lock().await;
		let count = reservations.len();
		reservations.clear();

		if count > 0 {
			log::debug!("released {} outstanding port reservations", count);
		}
	}

	/// Whether a reservation is currently held for `port`.
	pub async fn is_reserved(&self, port: u16) -> bool {
		self.reservations.lock().await.contains_key(&port)
	}

	/// Number of reservations currently held.
	#[cfg(test)]
	pub(crate) async fn reserved_count(&self) -> usize {
		self.reservations.lock().await.len()
	}
}
