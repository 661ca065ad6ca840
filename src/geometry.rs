//! Grid geometry primitives: positions and the 8-direction movement set.

use serde::{Deserialize, Serialize};

/// An immutable grid coordinate.
///
/// Ordered so ties between entities can be broken deterministically where
/// needed (movement resolution breaks ties on `entity_id`, not `Position`,
/// but downstream callers may still want a stable ordering over positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Return the position offset one step in `direction`.
    pub fn offset(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self::new(self.x + dx, self.y + dy)
    }
}

impl std::ops::Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The eight cardinal/diagonal movement directions.
///
/// Coordinate system: +X is east, +Y is south.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    Northeast,
    East,
    Southeast,
    South,
    Southwest,
    West,
    Northwest,
}

impl Direction {
    /// The `(dx, dy)` delta this direction moves a position by.
    pub const fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::Northeast => (1, -1),
            Direction::East => (1, 0),
            Direction::Southeast => (1, 1),
            Direction::South => (0, 1),
            Direction::Southwest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::Northwest => (-1, -1),
        }
    }

    /// For diagonal directions, the two cardinal components used by the
    /// corner-cutting rule. `None` for cardinal directions.
    pub const fn diagonal_components(self) -> Option<(Direction, Direction)> {
        match self {
            Direction::Northeast => Some((Direction::North, Direction::East)),
            Direction::Southeast => Some((Direction::South, Direction::East)),
            Direction::Southwest => Some((Direction::South, Direction::West)),
            Direction::Northwest => Some((Direction::North, Direction::West)),
            _ => None,
        }
    }

    pub const fn is_diagonal(self) -> bool {
        self.diagonal_components().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_applies_delta() {
        let p = Position::new(5, 5);
        assert_eq!(p.offset(Direction::North), Position::new(5, 4));
        assert_eq!(p.offset(Direction::Southeast), Position::new(6, 6));
    }

    #[test]
    fn diagonal_components_match_cardinal_pair() {
        let (d1, d2) = Direction::Northeast.diagonal_components().unwrap();
        assert_eq!(d1, Direction::North);
        assert_eq!(d2, Direction::East);
        assert!(Direction::North.diagonal_components().is_none());
    }

    #[test]
    fn position_ordering_is_deterministic() {
        let mut positions = vec![Position::new(1, 1), Position::new(0, 5), Position::new(0, 1)];
        positions.sort();
        assert_eq!(
            positions,
            vec![Position::new(0, 1), Position::new(0, 5), Position::new(1, 1)]
        );
    }
}
