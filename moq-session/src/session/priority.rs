use crate::message::GroupOrder;

const ID_MASK: u64 = (1 << 21) - 1;

// If the group order is oldest first, lower group ids get higher precedence.
// Otherwise flip the bits so higher group ids win.
fn group_bits(group_order: GroupOrder, group: u64) -> u64 {
	let trunc = group & ID_MASK;
	match group_order {
		GroupOrder::NewestFirst => ID_MASK - trunc,
		_ => trunc,
	}
}

/// Encode the scheduling inputs into a single send order, lower is sooner.
///
/// The precedence is: subscriber priority, then publisher priority, then group
/// order, then lowest subgroup. Layout, most significant first: 6 reserved
/// bits, 8 bits subscriber priority, 8 bits publisher priority, 21 bits of
/// group-order-adjusted group ID, 21 bits of subgroup ID.
pub fn stream_priority(
	subscriber_priority: u8,
	publisher_priority: u8,
	group_order: GroupOrder,
	group: u64,
	subgroup: u64,
) -> u64 {
	(u64::from(subscriber_priority) << 50)
		| (u64::from(publisher_priority) << 42)
		| (group_bits(group_order, group) << 21)
		| (subgroup & ID_MASK)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn layout() {
		let sub = 0x12;
		let order = stream_priority(sub, 128, GroupOrder::OldestFirst, 7, 0);
		assert_eq!(order, (u64::from(sub) << 50) | (128u64 << 42) | (7 << 21));
	}

	#[test]
	fn precedence() {
		// Subscriber priority dominates everything else.
		let low_sub = stream_priority(1, 255, GroupOrder::OldestFirst, ID_MASK, ID_MASK);
		let high_sub = stream_priority(2, 0, GroupOrder::OldestFirst, 0, 0);
		assert!(low_sub < high_sub);

		// Then publisher priority.
		let low_pub = stream_priority(1, 1, GroupOrder::OldestFirst, ID_MASK, ID_MASK);
		let high_pub = stream_priority(1, 2, GroupOrder::OldestFirst, 0, 0);
		assert!(low_pub < high_pub);

		// Then group order.
		let old = stream_priority(1, 1, GroupOrder::OldestFirst, 3, 0);
		let older = stream_priority(1, 1, GroupOrder::OldestFirst, 2, 0);
		assert!(older < old);

		let new = stream_priority(1, 1, GroupOrder::NewestFirst, 3, 0);
		let newer = stream_priority(1, 1, GroupOrder::NewestFirst, 4, 0);
		assert!(newer < new);

		// Then the lowest subgroup.
		let a = stream_priority(1, 1, GroupOrder::OldestFirst, 3, 1);
		let b = stream_priority(1, 1, GroupOrder::OldestFirst, 3, 2);
		assert!(a < b);
	}

	#[test]
	fn truncation() {
		// Only the low 21 bits of the group participate.
		let wide = stream_priority(0, 0, GroupOrder::OldestFirst, (1 << 21) | 5, 0);
		let narrow = stream_priority(0, 0, GroupOrder::OldestFirst, 5, 0);
		assert_eq!(wide, narrow);
	}
}
