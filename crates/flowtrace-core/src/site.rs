//! Canonical, interned call-site identities.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A canonical string identifying one call site, e.g. `"Buffer.retain"` or,
/// with the `_return` suffix, the exit recording of a returned value.
///
/// Equality and hashing are defined over the [`Arc`]'s *pointer*, not its
/// string contents: interning returns the same reference for equal strings,
/// modulo a bounded, well-defined replacement under saturation - two
/// `MethodSite`s are the same node-identity participant only if they came
/// from the same interner slot at the same time.
#[derive(Clone)]
pub struct MethodSite(Arc<str>);

impl MethodSite {
	pub(crate) fn from_arc(arc: Arc<str>) -> Self {
		MethodSite(arc)
	}

	/// The underlying string.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	fn ptr(&self) -> *const u8 {
		Arc::as_ptr(&self.0) as *const u8
	}
}

impl PartialEq for MethodSite {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl Eq for MethodSite {}

impl Hash for MethodSite {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.ptr().hash(state);
	}
}

impl fmt::Debug for MethodSite {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("MethodSite").field(&self.0.as_ref()).finish()
	}
}

impl fmt::Display for MethodSite {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// The `_return` suffix recorded for the exit recording of a returned value.
pub const RETURN_SUFFIX: &str = "_return";

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn equality_is_pointer_identity_not_content() {
		let a = MethodSite::from_arc(Arc::from("A.m"));
		let b = MethodSite::from_arc(Arc::from("A.m"));
		assert_eq!(a.as_str(), b.as_str());
		assert_ne!(a, b, "distinct Arc allocations with equal content are distinct identities");
		assert_eq!(a.clone(), a);
	}
}
