use crate::control_system::traffic_light::{SignalTimings, TrafficLight};
use crate::error::{SimError, SimResult};
use crate::global_variables::MAX_REGIONS;
use crate::simulation_engine::ids::{IdAllocator, NodeId, RegionCoord, StreetId};
use crate::simulation_engine::junction::Junction;
use crate::simulation_engine::node::Node;
use crate::simulation_engine::region::Region;
use crate::simulation_engine::street::{Direction, OneWay, Street, StreetDisplay};
use crate::simulation_engine::vehicles::{Rsu, Vehicle};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

/// Columns and rows of regions for the given dimensions, or `None` when a
/// dimension is not positive or the grid would exceed `MAX_REGIONS`.
fn region_grid_size(
    width: i32,
    height: i32,
    region_width: i32,
    region_height: i32,
) -> Option<(usize, usize)> {
    if width <= 0 || height <= 0 || region_width <= 0 || region_height <= 0 {
        return None;
    }
    let cols = (width as i64 + region_width as i64 - 1) / region_width as i64;
    let rows = (height as i64 + region_height as i64 - 1) / region_height as i64;
    if cols.checked_mul(rows)? > MAX_REGIONS as i64 {
        return None;
    }
    Some((cols as usize, rows as usize))
}

/// One street of a route together with the direction it is driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteLeg {
    pub street: StreetId,
    pub direction: Direction,
}

/// The simulation world: a grid of regions plus the street graph laid over it.
///
/// A map is built single-threaded (`init_new_map`, `add_node`, `add_street`,
/// `finish_loading`) and then shared read-only with the workers behind an
/// `Arc`. Everything workers mutate lives behind per-object locks.
#[derive(Debug)]
pub struct Map {
    width: i32,
    height: i32,
    region_width: i32,
    region_height: i32,
    region_cols: usize,
    region_rows: usize,
    /// Row-major: index = `row * region_cols + col`.
    regions: Vec<Region>,
    nodes: BTreeMap<NodeId, Node>,
    streets: BTreeMap<StreetId, Street>,
    node_lookup: HashMap<(i32, i32), NodeId>,
    ids: IdAllocator,
    /// False between `init_new_map` and `finish_loading`.
    ready: bool,
    signal_timings: SignalTimings,
}

impl Map {
    /// Creates a map with an empty region grid. The map is loading until `finish_loading` is called.
    pub fn new(width: i32, height: i32, region_width: i32, region_height: i32) -> SimResult<Self> {
        let mut map = Self {
            width: 0,
            height: 0,
            region_width: 1,
            region_height: 1,
            region_cols: 0,
            region_rows: 0,
            regions: Vec::new(),
            nodes: BTreeMap::new(),
            streets: BTreeMap::new(),
            node_lookup: HashMap::new(),
            ids: IdAllocator::default(),
            ready: true,
            signal_timings: SignalTimings::default(),
        };
        map.init_new_map(width, height, region_width, region_height)?;
        Ok(map)
    }

    /// Tears down the previous grid and builds `ceil(width/region_width) x ceil(height/region_height)`
    /// regions tiling `[0, width-1] x [0, height-1]`.
    ///
    /// Refuses (and leaves everything untouched) if the previous map has not
    /// finished loading, if any dimension is not positive, or if the grid
    /// would hold more than `MAX_REGIONS` regions.
    pub fn init_new_map(
        &mut self,
        width: i32,
        height: i32,
        region_width: i32,
        region_height: i32,
    ) -> SimResult<()> {
        if !self.ready {
            log::error!("Refusing to initialise a new map while the previous one is still loading");
            return Err(SimError::MapNotReady);
        }
        let grid = region_grid_size(width, height, region_width, region_height);
        let Some((cols, rows)) = grid else {
            log::error!(
                "Refusing map of {}x{} with regions of {}x{}",
                width,
                height,
                region_width,
                region_height
            );
            return Err(SimError::InvalidDimensions {
                width,
                height,
                region_width,
                region_height,
            });
        };
        self.ready = false;

        let mut regions = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                // Each bound is at most width - 1 or height - 1, so it fits in i32.
                let left = col as i64 * region_width as i64;
                let top = row as i64 * region_height as i64;
                let right = (left + region_width as i64).min(width as i64) - 1;
                let bottom = (top + region_height as i64).min(height as i64) - 1;
                regions.push(Region::new(
                    RegionCoord(col, row),
                    left as i32,
                    right as i32,
                    top as i32,
                    bottom as i32,
                ));
            }
        }

        self.width = width;
        self.height = height;
        self.region_width = region_width;
        self.region_height = region_height;
        self.region_cols = cols;
        self.region_rows = rows;
        self.regions = regions;
        self.nodes.clear();
        self.streets.clear();
        self.node_lookup.clear();
        self.ids.reset();

        log::info!(
            "Initialised {}x{} map with {}x{} regions",
            width,
            height,
            cols,
            rows
        );
        Ok(())
    }

    /// Marks loading as complete and computes every junction and traffic light.
    pub fn finish_loading(&mut self) {
        self.calculate_junctions();
        self.ready = true;
        log::info!(
            "Map ready: {} nodes, {} streets, {} junctions, {} traffic lights",
            self.nodes.len(),
            self.streets.len(),
            self.junction_count(),
            self.traffic_light_count()
        );
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn region_size(&self) -> (i32, i32) {
        (self.region_width, self.region_height)
    }

    pub fn region_grid(&self) -> (usize, usize) {
        (self.region_cols, self.region_rows)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, coord: RegionCoord) -> Option<&Region> {
        if coord.0 >= self.region_cols || coord.1 >= self.region_rows {
            return None;
        }
        self.regions.get(coord.1 * self.region_cols + coord.0)
    }

    fn region_mut(&mut self, coord: RegionCoord) -> Option<&mut Region> {
        if coord.0 >= self.region_cols || coord.1 >= self.region_rows {
            return None;
        }
        self.regions.get_mut(coord.1 * self.region_cols + coord.0)
    }

    fn column_of(&self, x: i32) -> usize {
        (x.max(0) / self.region_width).min(self.region_cols as i32 - 1).max(0) as usize
    }

    fn row_of(&self, y: i32) -> usize {
        (y.max(0) / self.region_height).min(self.region_rows as i32 - 1).max(0) as usize
    }

    /// The region containing `(x, y)`. Points outside the map resolve to the nearest edge region.
    pub fn region_of_point(&self, x: i32, y: i32) -> RegionCoord {
        RegionCoord(self.column_of(x), self.row_of(y))
    }

    /// Every region whose cell the segment from `start` to `end` passes through.
    ///
    /// Cells are half-open, so a segment that only touches a cell's excluded
    /// right or bottom border is not reported for it.
    pub fn regions_crossed(&self, start: (i32, i32), end: (i32, i32)) -> Vec<RegionCoord> {
        let first = self.region_of_point(start.0, start.1);
        let last = self.region_of_point(end.0, end.1);
        if first == last {
            return vec![first];
        }

        let mut found = BTreeSet::new();
        found.insert(first);
        found.insert(last);

        if start.0 == end.0 {
            let (lo, hi) = (first.1.min(last.1), first.1.max(last.1));
            for row in lo..=hi {
                found.insert(RegionCoord(first.0, row));
            }
        } else if start.1 == end.1 {
            let (lo, hi) = (first.0.min(last.0), first.0.max(last.0));
            for col in lo..=hi {
                found.insert(RegionCoord(col, first.1));
            }
        } else {
            // Walk columns left to right, evaluating y = ly + (x - lx) * dy / dx
            // exactly on every internal vertical grid line.
            let ((lx, ly), (rx, ry)) = if start.0 < end.0 {
                (start, end)
            } else {
                (end, start)
            };
            let (lx, ly, rx, ry) = (
                i128::from(lx),
                i128::from(ly),
                i128::from(rx),
                i128::from(ry),
            );
            let dx = rx - lx;
            let dy = ry - ly;
            let rh = i128::from(self.region_height);
            let max_row = self.region_rows as i128 - 1;
            let row_at = |x: i128, exclusive: bool| -> usize {
                let num = ly * dx + (x - lx) * dy;
                let den = dx * rh;
                let mut row = num.div_euclid(den);
                if exclusive && dy > 0 && num.rem_euclid(den) == 0 {
                    row -= 1;
                }
                row.clamp(0, max_row) as usize
            };

            let c_lo = self.column_of(start.0.min(end.0));
            let c_hi = self.column_of(start.0.max(end.0));
            for col in c_lo..=c_hi {
                let col_left = col as i128 * i128::from(self.region_width);
                let xa = if col == c_lo { lx } else { col_left };
                let (xb, exclusive) = if col == c_hi {
                    (rx, false)
                } else {
                    (col_left + i128::from(self.region_width), true)
                };
                let ra = row_at(xa, false);
                let rb = row_at(xb, exclusive);
                for row in ra.min(rb)..=ra.max(rb) {
                    found.insert(RegionCoord(col, row));
                }
            }
        }
        found.into_iter().collect()
    }

    // ---------------------------------------------------------------- nodes

    /// Adds a node, or returns the existing node at the same coordinates.
    pub fn add_node(&mut self, x: i32, y: i32, has_traffic_signal: bool) -> NodeId {
        if let Some(&existing) = self.node_lookup.get(&(x, y)) {
            if has_traffic_signal {
                if let Some(node) = self.nodes.get_mut(&existing) {
                    node.has_traffic_signal = true;
                }
            }
            return existing;
        }
        let id = self.ids.next_node();
        let coord = self.region_of_point(x, y);
        let mut node = Node::new(id, x, y, has_traffic_signal);
        node.region = Some(coord);
        if let Some(region) = self.region_mut(coord) {
            region.add_node(id);
        }
        self.nodes.insert(id, node);
        self.node_lookup.insert((x, y), id);
        id
    }

    /// Removes a node together with every street attached to it.
    pub fn del_node(&mut self, id: NodeId) -> SimResult<()> {
        let streets = self
            .nodes
            .get(&id)
            .map(|n| n.crossing_streets.clone())
            .ok_or(SimError::UnknownNode(id))?;
        for street in streets {
            self.del_street(street)?;
        }
        if let Some(node) = self.nodes.remove(&id) {
            self.node_lookup.remove(&(node.x, node.y));
            if let Some(coord) = node.region {
                if let Some(region) = self.region_mut(coord) {
                    region.del_node(id);
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_at(&self, x: i32, y: i32) -> Option<NodeId> {
        self.node_lookup.get(&(x, y)).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn set_mix_zone(&mut self, id: NodeId, radius: i32) -> SimResult<()> {
        let node = self.nodes.get_mut(&id).ok_or(SimError::UnknownNode(id))?;
        node.mix_zone_radius = Some(radius);
        if let Some(coord) = node.region {
            if let Some(region) = self.region_mut(coord) {
                region.add_mix_zone_node(id);
            }
        }
        Ok(())
    }

    pub fn set_amenity(&mut self, id: NodeId, amenity: impl Into<String>) -> SimResult<()> {
        let node = self.nodes.get_mut(&id).ok_or(SimError::UnknownNode(id))?;
        node.amenity = Some(amenity.into());
        Ok(())
    }

    // -------------------------------------------------------------- streets

    /// Adds a street and registers it in every region it crosses.
    #[allow(clippy::too_many_arguments)]
    pub fn add_street(
        &mut self,
        name: &str,
        start: NodeId,
        end: NodeId,
        oneway: OneWay,
        lanes_per_direction: u32,
        max_speed: i32,
        display: StreetDisplay,
    ) -> SimResult<StreetId> {
        let start_node = self.nodes.get(&start).ok_or(SimError::UnknownNode(start))?;
        let end_node = self.nodes.get(&end).ok_or(SimError::UnknownNode(end))?;
        let id = self.ids.next_street();
        let street = Street::new(
            id,
            name,
            start_node,
            end_node,
            oneway,
            lanes_per_direction,
            max_speed,
            display,
        )?;

        let (from, to, bidirectional) = (street.start, street.end, !street.oneway);
        if let Some(node) = self.nodes.get_mut(&from) {
            node.attach_street(id, true);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.attach_street(id, bidirectional);
        }
        for coord in self.regions_crossed(street.start_point, street.end_point) {
            if let Some(region) = self.region_mut(coord) {
                region.add_street(id);
            }
        }
        self.streets.insert(id, street);

        if self.ready {
            self.refresh_junction(from);
            self.refresh_junction(to);
        }
        Ok(id)
    }

    /// Removes a street from its nodes and from every region it was registered in.
    pub fn del_street(&mut self, id: StreetId) -> SimResult<()> {
        let street = self.streets.remove(&id).ok_or(SimError::UnknownStreet(id))?;
        for node in [street.start, street.end] {
            if let Some(node) = self.nodes.get_mut(&node) {
                node.detach_street(id);
            }
        }
        for coord in self.regions_crossed(street.start_point, street.end_point) {
            if let Some(region) = self.region_mut(coord) {
                region.del_street(id);
            }
        }
        if self.ready {
            self.refresh_junction(street.start);
            self.refresh_junction(street.end);
        }
        Ok(())
    }

    pub fn street(&self, id: StreetId) -> Option<&Street> {
        self.streets.get(&id)
    }

    pub fn streets(&self) -> impl Iterator<Item = &Street> {
        self.streets.values()
    }

    pub fn street_count(&self) -> usize {
        self.streets.len()
    }

    /// A street drivable from `from` directly to `to`.
    pub fn street_between(&self, from: NodeId, to: NodeId) -> Option<StreetId> {
        let node = self.nodes.get(&from)?;
        node.outgoing_streets.iter().copied().find(|id| {
            self.streets
                .get(id)
                .map(|s| s.other_end(from) == Some(to) && s.direction_from(from).is_some())
                .unwrap_or(false)
        })
    }

    /// Resolves a path of directly connected nodes into street legs.
    pub fn route_from_nodes(&self, path: &[NodeId]) -> SimResult<Vec<RouteLeg>> {
        if path.len() < 2 {
            return Err(SimError::RouteTooShort);
        }
        path.windows(2)
            .map(|pair| {
                let street = self
                    .street_between(pair[0], pair[1])
                    .ok_or(SimError::NoStreetBetween(pair[0], pair[1]))?;
                let direction = self
                    .streets
                    .get(&street)
                    .and_then(|s| s.direction_from(pair[0]))
                    .ok_or(SimError::NoStreetBetween(pair[0], pair[1]))?;
                Ok(RouteLeg { street, direction })
            })
            .collect()
    }

    /// The street closest to `(x, y)`, searching only the regions around the point.
    pub fn nearest_street(&self, x: i32, y: i32) -> Option<(StreetId, f64)> {
        let RegionCoord(col, row) = self.region_of_point(x, y);
        let mut best: Option<(StreetId, f64)> = None;
        let mut seen = BTreeSet::new();
        for c in col.saturating_sub(1)..=(col + 1).min(self.region_cols - 1) {
            for r in row.saturating_sub(1)..=(row + 1).min(self.region_rows - 1) {
                let Some(region) = self.region(RegionCoord(c, r)) else {
                    continue;
                };
                for &id in region.streets() {
                    if !seen.insert(id) {
                        continue;
                    }
                    let Some(street) = self.streets.get(&id) else {
                        continue;
                    };
                    let distance = distance_to_segment((x, y), street.start_point, street.end_point);
                    let better = match best {
                        None => true,
                        Some((best_id, best_distance)) => {
                            distance < best_distance
                                || (distance == best_distance && id < best_id)
                        }
                    };
                    if better {
                        best = Some((id, distance));
                    }
                }
            }
        }
        best
    }

    // ------------------------------------------------------------ junctions

    pub fn set_signal_timings(&mut self, timings: SignalTimings) {
        self.signal_timings = timings;
    }

    pub fn signal_timings(&self) -> &SignalTimings {
        &self.signal_timings
    }

    /// Recomputes every junction and traffic light from the current topology.
    pub fn calculate_junctions(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.refresh_junction(id);
        }
    }

    /// Recomputes the junction (and traffic light) of one node after an edit.
    fn refresh_junction(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        for street in &node.crossing_streets {
            if let Some(street) = self.streets.get(street) {
                street.clear_traffic_light_state(id);
            }
        }
        let junction = Junction::calculate(self, id);
        let light = match (&junction, node.has_traffic_signal) {
            (Some(junction), true) => Some(TrafficLight::new(self, junction, &self.signal_timings)),
            _ => None,
        };
        if let Some(light) = &light {
            light.push_states(self);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.junction = junction;
            node.traffic_light = light.map(Mutex::new);
        }
    }

    pub fn junctions(&self) -> impl Iterator<Item = &Junction> {
        self.nodes.values().filter_map(|n| n.junction.as_ref())
    }

    pub fn junction_count(&self) -> usize {
        self.junctions().count()
    }

    pub fn traffic_light_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.traffic_light.is_some())
            .count()
    }

    // ------------------------------------------------------------- vehicles

    /// Hands a vehicle to the region it is located in. It becomes part of the
    /// region's list when the owning worker starts its next tick.
    pub fn add_vehicle(&self, vehicle: Box<dyn Vehicle>) {
        let (x, y) = vehicle.position();
        let coord = self.region_of_point(x, y);
        if let Some(region) = self.region(coord) {
            region.deliver(vehicle);
        }
    }

    pub fn add_rsu(&mut self, rsu: Box<dyn Rsu>) {
        let (x, y) = rsu.position();
        let coord = self.region_of_point(x, y);
        if let Some(region) = self.region_mut(coord) {
            region.state().add_rsu(rsu);
        }
    }

    /// Vehicles held by regions, including those still waiting in an inbox.
    pub fn vehicle_count(&self) -> usize {
        self.regions
            .iter()
            .map(|r| r.state().vehicles().len() + r.pending_deliveries())
            .sum()
    }
}

fn distance_to_segment(p: (i32, i32), a: (i32, i32), b: (i32, i32)) -> f64 {
    let (px, py) = (f64::from(p.0), f64::from(p.1));
    let (ax, ay) = (f64::from(a.0), f64::from(a.1));
    let (bx, by) = (f64::from(b.0), f64::from(b.1));
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return (px - ax).hypot(py - ay);
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0);
    (px - (ax + t * dx)).hypot(py - (ay + t * dy))
}
