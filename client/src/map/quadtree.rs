//! Quadtree index over geo-tagged points
//!
//! The tree partitions latitude/longitude space recursively and answers
//! inclusive bounding-box queries. [`SpatialIndex`] pairs it with the ordered
//! point collection it was built from.

use super::tile::{BoundingBox, GeoPoint};

/// Maximum depth of the tree; deeper leaves just grow
const MAX_DEPTH: u32 = 16;

/// Entries a leaf holds before it splits
const NODE_CAPACITY: usize = 8;

struct Entry<T> {
    latitude: f64,
    longitude: f64,
    value: T,
}

/// Child slot for an entry; points on a split line go north/east
fn quadrant<T>(entry: &Entry<T>, mid_lat: f64, mid_lon: f64) -> usize {
    ((entry.latitude >= mid_lat) as usize) * 2 + (entry.longitude >= mid_lon) as usize
}

struct Node<T> {
    bounds: BoundingBox,
    depth: u32,
    entries: Vec<Entry<T>>,
    /// Children (SW, SE, NW, NE) once split
    children: Option<Box<[Node<T>; 4]>>,
}

impl<T> Node<T> {
    fn new(bounds: BoundingBox, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            entries: Vec::new(),
            children: None,
        }
    }

    fn center(&self) -> (f64, f64) {
        (
            (self.bounds.lat_min + self.bounds.lat_max) / 2.0,
            (self.bounds.lon_min + self.bounds.lon_max) / 2.0,
        )
    }

    fn insert(&mut self, entry: Entry<T>) {
        let (mid_lat, mid_lon) = self.center();
        if let Some(children) = self.children.as_mut() {
            children[quadrant(&entry, mid_lat, mid_lon)].insert(entry);
            return;
        }

        self.entries.push(entry);
        if self.entries.len() > NODE_CAPACITY && self.depth < MAX_DEPTH {
            self.split();
        }
    }

    fn split(&mut self) {
        let b = self.bounds;
        let (mid_lat, mid_lon) = self.center();
        let depth = self.depth + 1;
        let mut children = Box::new([
            Node::new(BoundingBox::new(b.lat_min, mid_lat, b.lon_min, mid_lon), depth),
            Node::new(BoundingBox::new(b.lat_min, mid_lat, mid_lon, b.lon_max), depth),
            Node::new(BoundingBox::new(mid_lat, b.lat_max, b.lon_min, mid_lon), depth),
            Node::new(BoundingBox::new(mid_lat, b.lat_max, mid_lon, b.lon_max), depth),
        ]);

        for entry in self.entries.drain(..) {
            children[quadrant(&entry, mid_lat, mid_lon)].insert(entry);
        }
        self.children = Some(children);
    }

    fn query<'a>(&'a self, area: &BoundingBox, out: &mut Vec<&'a T>) {
        if !self.bounds.intersects(area) {
            return;
        }
        out.extend(
            self.entries
                .iter()
                .filter(|e| area.contains(e.latitude, e.longitude))
                .map(|e| &e.value),
        );
        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(area, out);
            }
        }
    }
}

/// Region-queryable point tree
pub struct QuadTree<T> {
    root: Node<T>,
    len: usize,
}

impl<T> QuadTree<T> {
    pub fn new(bounds: BoundingBox) -> Self {
        Self {
            root: Node::new(bounds, 0),
            len: 0,
        }
    }

    /// Tree covering every valid latitude and longitude
    pub fn world() -> Self {
        Self::new(BoundingBox::new(-90.0, 90.0, -180.0, 180.0))
    }

    pub fn bounds(&self) -> BoundingBox {
        self.root.bounds
    }

    /// Insert a value at a position; returns false if it lies outside the tree
    pub fn insert(&mut self, latitude: f64, longitude: f64, value: T) -> bool {
        if !self.root.bounds.contains(latitude, longitude) {
            return false;
        }
        self.root.insert(Entry {
            latitude,
            longitude,
            value,
        });
        self.len += 1;
        true
    }

    /// Every value whose position lies inside `area`, edges included.
    ///
    /// A zero-area box matches nothing.
    pub fn query(&self, area: &BoundingBox) -> Vec<&T> {
        let mut out = Vec::new();
        if !area.is_degenerate() {
            self.root.query(area, &mut out);
        }
        out
    }

    pub fn clear(&mut self) {
        self.root = Node::new(self.root.bounds, 0);
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Ordered point collection plus a quadtree over it
pub struct SpatialIndex {
    points: Vec<GeoPoint>,
    tree: QuadTree<usize>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            tree: QuadTree::world(),
        }
    }

    pub fn from_points(points: Vec<GeoPoint>) -> Self {
        let mut index = Self::new();
        index.assign(points);
        index
    }

    /// Replace the backing collection and rebuild the tree from scratch
    pub fn assign(&mut self, points: Vec<GeoPoint>) {
        self.remove_all();
        for point in points {
            self.insert(point);
        }
    }

    pub fn insert(&mut self, point: GeoPoint) {
        let index = self.points.len();
        self.tree.insert(point.latitude(), point.longitude(), index);
        self.points.push(point);
    }

    pub fn remove_all(&mut self) {
        self.points.clear();
        self.tree.clear();
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<&GeoPoint> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Collection indices of the points inside `area`, ascending
    pub fn query_indices(&self, area: &BoundingBox) -> Vec<usize> {
        let mut indices: Vec<usize> = self.tree.query(area).into_iter().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Points inside `area` in collection order
    pub fn query(&self, area: &BoundingBox) -> Vec<GeoPoint> {
        self.query_indices(area)
            .into_iter()
            .map(|i| self.points[i])
            .collect()
    }

    /// Planar-closest point to `center` among those inside `area`.
    /// Ties go to the lowest collection index.
    pub fn nearest_in(&self, area: &BoundingBox, center: &GeoPoint) -> Option<(usize, GeoPoint)> {
        self.nearest_in_parts(&[(*area, 0.0)], center.latitude(), center.longitude())
    }

    /// Like [`nearest_in`](Self::nearest_in) over areas split at the
    /// antimeridian. A point found in a part is measured at its longitude
    /// plus the part's shift, so `longitude` may lie outside ±180.
    pub fn nearest_in_parts(
        &self,
        parts: &[(BoundingBox, f64)],
        latitude: f64,
        longitude: f64,
    ) -> Option<(usize, GeoPoint)> {
        let mut best: Option<(usize, f64)> = None;
        for (area, shift) in parts {
            for index in self.query_indices(area) {
                let point = &self.points[index];
                let dlat = point.latitude() - latitude;
                let dlon = point.longitude() + shift - longitude;
                let distance = (dlat * dlat + dlon * dlon).sqrt();
                let better = best.is_none_or(|(i, d)| distance < d || (distance == d && index < i));
                if better {
                    best = Some((index, distance));
                }
            }
        }
        best.map(|(index, _)| (index, self.points[index]))
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}
