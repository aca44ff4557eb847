//! Seating order derivation and turn rotation.
//!
//! Every client derives the order independently from the `seats` map, so both
//! functions here are pure: the same map always yields the same order on every
//! participant.

use std::collections::BTreeMap;

use crate::document::{Direction, ParticipantId, SeatNumber, SeatSlot};

/// Occupied seats' participant ids, by ascending seat number.
pub type SeatingOrder = Vec<ParticipantId>;

/// Derive the seating order: drop empty seats, sort by seat number, keep ids.
pub fn compute_order(seats: &BTreeMap<SeatNumber, SeatSlot>) -> SeatingOrder {
    let mut occupied: Vec<(SeatNumber, &str)> = seats
        .iter()
        .filter_map(|(seat, slot)| slot.occupant().map(|id| (*seat, id)))
        .collect();
    occupied.sort_by_key(|(seat, _)| *seat);
    occupied.into_iter().map(|(_, id)| id.to_string()).collect()
}

/// The participant that receives the ball when `self_id` passes in
/// `direction`.
///
/// `Left` moves to the next entry of `order`, `Right` to the previous one,
/// both wrapping around. If `self_id` is not seated, it is returned unchanged.
pub fn next_in_order(
    order: &[ParticipantId],
    self_id: &str,
    direction: Direction,
) -> ParticipantId {
    let Some(index) = order.iter().position(|id| id == self_id) else {
        return self_id.to_string();
    };
    let len = order.len();
    let next = match direction {
        Direction::Left => (index + 1) % len,
        Direction::Right => (index + len - 1) % len,
    };
    order
        .get(next)
        .cloned()
        .unwrap_or_else(|| self_id.to_string())
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn seats(entries: &[(SeatNumber, Option<&str>)]) -> BTreeMap<SeatNumber, SeatSlot> {
        entries
            .iter()
            .map(|(n, id)| {
                let slot = id.map_or(SeatSlot::Empty, |id| SeatSlot::Occupied(id.to_string()));
                (*n, slot)
            })
            .collect()
    }

    fn ids(names: &[&str]) -> SeatingOrder {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn order_skips_empty_seats_and_sorts_numerically() {
        let map = seats(&[
            (10, Some("J")),
            (2, None),
            (9, Some("I")),
            (1, Some("A")),
            (3, Some("C")),
        ]);
        assert_eq!(compute_order(&map), ids(&["A", "C", "I", "J"]));
    }

    #[test]
    fn order_is_deterministic() {
        let map = seats(&[(3, Some("C")), (1, Some("A")), (2, Some("B"))]);
        let first = compute_order(&map);
        let second = compute_order(&map.clone());
        assert_eq!(first, second);

        let seat_numbers: Vec<SeatNumber> = first
            .iter()
            .filter_map(|id| {
                map.iter()
                    .find(|(_, slot)| slot.occupant() == Some(id.as_str()))
                    .map(|(seat, _)| *seat)
            })
            .collect();
        assert_eq!(seat_numbers.len(), 3);
        assert!(seat_numbers.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn empty_table_has_empty_order() {
        assert!(compute_order(&seats(&[(1, None), (2, None)])).is_empty());
        assert!(compute_order(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn rotation_wraps_in_both_directions() {
        for n in 2..=7 {
            let order: SeatingOrder = (0..n).map(|i| format!("p{i}")).collect();
            for i in 0..n {
                assert_eq!(
                    next_in_order(&order, &order[i], Direction::Left),
                    order[(i + 1) % n]
                );
                assert_eq!(
                    next_in_order(&order, &order[i], Direction::Right),
                    order[(i + n - 1) % n]
                );
            }
        }
    }

    #[test]
    fn three_seat_scenario_passes_left_around_the_table() {
        let order = compute_order(&seats(&[(1, Some("A")), (2, Some("B")), (3, Some("C"))]));
        assert_eq!(order, ids(&["A", "B", "C"]));
        assert_eq!(next_in_order(&order, "A", Direction::Left), "B");
        assert_eq!(next_in_order(&order, "B", Direction::Left), "C");
        assert_eq!(next_in_order(&order, "C", Direction::Left), "A");
    }

    #[test]
    fn unseated_or_lonely_passer_keeps_the_ball() {
        let order = ids(&["A", "B"]);
        assert_eq!(next_in_order(&order, "Z", Direction::Left), "Z");
        assert_eq!(next_in_order(&[], "Z", Direction::Right), "Z");
        assert_eq!(next_in_order(&ids(&["A"]), "A", Direction::Left), "A");
        assert_eq!(next_in_order(&ids(&["A"]), "A", Direction::Right), "A");
    }
}
