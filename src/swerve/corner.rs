// Corner identity for the four swerve modules

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// One of the four wheel assemblies of the base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerId {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl CornerId {
    /// All corners in slot order
    pub const ALL: [CornerId; 4] = [
        CornerId::FrontLeft,
        CornerId::FrontRight,
        CornerId::RearLeft,
        CornerId::RearRight,
    ];

    /// Slot of this corner inside a [`Corners`] container
    pub const fn index(self) -> usize {
        match self {
            CornerId::FrontLeft => 0,
            CornerId::FrontRight => 1,
            CornerId::RearLeft => 2,
            CornerId::RearRight => 3,
        }
    }

    pub fn is_front(self) -> bool {
        matches!(self, CornerId::FrontLeft | CornerId::FrontRight)
    }

    pub fn is_left(self) -> bool {
        matches!(self, CornerId::FrontLeft | CornerId::RearLeft)
    }
}

impl fmt::Display for CornerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CornerId::FrontLeft => "FrontLeft",
            CornerId::FrontRight => "FrontRight",
            CornerId::RearLeft => "RearLeft",
            CornerId::RearRight => "RearRight",
        };
        f.write_str(name)
    }
}

/// Exactly one value per corner, indexed by [`CornerId`]
///
/// Serialized as an object keyed by corner name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "NamedCorners<T>",
    into = "NamedCorners<T>",
    bound(serialize = "T: Clone + Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct Corners<T> {
    slots: [T; 4],
}

/// Wire layout of [`Corners`]
#[derive(Serialize, Deserialize)]
pub struct NamedCorners<T> {
    front_left: T,
    front_right: T,
    rear_left: T,
    rear_right: T,
}

impl<T> From<NamedCorners<T>> for Corners<T> {
    fn from(named: NamedCorners<T>) -> Self {
        Corners::new(
            named.front_left,
            named.front_right,
            named.rear_left,
            named.rear_right,
        )
    }
}

impl<T> From<Corners<T>> for NamedCorners<T> {
    fn from(corners: Corners<T>) -> Self {
        let [front_left, front_right, rear_left, rear_right] = corners.slots;
        NamedCorners {
            front_left,
            front_right,
            rear_left,
            rear_right,
        }
    }
}

impl<T> Corners<T> {
    /// Values given in [`CornerId::ALL`] order
    pub fn new(front_left: T, front_right: T, rear_left: T, rear_right: T) -> Self {
        Self {
            slots: [front_left, front_right, rear_left, rear_right],
        }
    }

    /// Build by evaluating `f` once per corner
    pub fn from_fn(mut f: impl FnMut(CornerId) -> T) -> Self {
        Self {
            slots: CornerId::ALL.map(&mut f),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(CornerId, T) -> U) -> Corners<U> {
        let [front_left, front_right, rear_left, rear_right] = self.slots;
        Corners::new(
            f(CornerId::FrontLeft, front_left),
            f(CornerId::FrontRight, front_right),
            f(CornerId::RearLeft, rear_left),
            f(CornerId::RearRight, rear_right),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (CornerId, &T)> {
        CornerId::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (CornerId, &mut T)> {
        CornerId::ALL.into_iter().zip(self.slots.iter_mut())
    }

    pub fn values(&self) -> &[T; 4] {
        &self.slots
    }

    pub fn into_values(self) -> [T; 4] {
        self.slots
    }
}

impl<T> Index<CornerId> for Corners<T> {
    type Output = T;

    fn index(&self, corner: CornerId) -> &T {
        &self.slots[corner.index()]
    }
}

impl<T> IndexMut<CornerId> for Corners<T> {
    fn index_mut(&mut self, corner: CornerId) -> &mut T {
        &mut self.slots[corner.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_all_order() {
        for (i, corner) in CornerId::ALL.iter().enumerate() {
            assert_eq!(corner.index(), i);
        }
    }

    #[test]
    fn test_corners_indexing() {
        let mut corners = Corners::new(1, 2, 3, 4);
        assert_eq!(corners[CornerId::FrontLeft], 1);
        assert_eq!(corners[CornerId::RearRight], 4);

        corners[CornerId::RearLeft] = 30;
        assert_eq!(corners.values(), &[1, 2, 30, 4]);
    }

    #[test]
    fn test_map_passes_matching_corner() {
        let corners = Corners::from_fn(|corner| corner.index());
        let mapped = corners.map(|corner, value| (corner, value * 10));
        for (corner, &(mapped_corner, value)) in mapped.iter() {
            assert_eq!(corner, mapped_corner);
            assert_eq!(value, corner.index() * 10);
        }
    }

    #[test]
    fn test_corner_layout_helpers() {
        assert!(CornerId::FrontLeft.is_front() && CornerId::FrontLeft.is_left());
        assert!(CornerId::FrontRight.is_front() && !CornerId::FrontRight.is_left());
        assert!(!CornerId::RearLeft.is_front() && CornerId::RearLeft.is_left());
        assert!(!CornerId::RearRight.is_front() && !CornerId::RearRight.is_left());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&CornerId::RearLeft).unwrap();
        assert_eq!(json, "\"rear_left\"");
    }

    #[test]
    fn test_corners_serialize_by_name() {
        let corners = Corners::new(1, 2, 3, 4);
        let json = serde_json::to_value(corners).unwrap();
        assert_eq!(json["front_right"], 2);
        assert_eq!(json["rear_left"], 3);

        let parsed: Corners<i32> = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, corners);
    }
}
