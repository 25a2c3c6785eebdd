use crate::control_system::traffic_light::TrafficLight;
use crate::simulation_engine::ids::{NodeId, RegionCoord, StreetId};
use crate::simulation_engine::junction::Junction;
use std::sync::Mutex;

/// A vertex of the street graph.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    /// Coordinates in cm.
    pub x: i32,
    pub y: i32,
    pub has_traffic_signal: bool,
    /// Streets that may be departed from this node.
    pub outgoing_streets: Vec<StreetId>,
    /// Every street touching this node.
    pub crossing_streets: Vec<StreetId>,
    /// Region the node lies in. Only a lookup key, the region does not own the node.
    pub region: Option<RegionCoord>,
    pub junction: Option<Junction>,
    pub traffic_light: Option<Mutex<TrafficLight>>,
    pub mix_zone_radius: Option<i32>,
    pub amenity: Option<String>,
}

impl Node {
    pub fn new(id: NodeId, x: i32, y: i32, has_traffic_signal: bool) -> Self {
        Self {
            id,
            x,
            y,
            has_traffic_signal,
            outgoing_streets: Vec::new(),
            crossing_streets: Vec::new(),
            region: None,
            junction: None,
            traffic_light: None,
            mix_zone_radius: None,
            amenity: None,
        }
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn same_location(&self, x: i32, y: i32) -> bool {
        self.x == x && self.y == y
    }

    pub(crate) fn attach_street(&mut self, street: StreetId, outgoing: bool) {
        if !self.crossing_streets.contains(&street) {
            self.crossing_streets.push(street);
        }
        if outgoing && !self.outgoing_streets.contains(&street) {
            self.outgoing_streets.push(street);
        }
    }

    pub(crate) fn detach_street(&mut self, street: StreetId) {
        self.crossing_streets.retain(|s| *s != street);
        self.outgoing_streets.retain(|s| *s != street);
    }

    pub fn is_junction(&self) -> bool {
        self.junction.is_some()
    }
}

/// Nodes are identified structurally by their location.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y
    }
}

impl Eq for Node {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_compare_by_location() {
        let a = Node::new(NodeId(1), 10, 20, false);
        let b = Node::new(NodeId(2), 10, 20, true);
        let c = Node::new(NodeId(1), 11, 20, false);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn attach_is_idempotent() {
        let mut node = Node::new(NodeId(0), 0, 0, false);
        node.attach_street(StreetId(4), false);
        node.attach_street(StreetId(4), true);
        assert_eq!(node.crossing_streets, vec![StreetId(4)]);
        assert_eq!(node.outgoing_streets, vec![StreetId(4)]);
        node.detach_street(StreetId(4));
        assert!(node.crossing_streets.is_empty());
        assert!(node.outgoing_streets.is_empty());
    }
}
