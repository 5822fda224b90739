use crate::coords::RoomCoords;
use crate::error::MapError;
use crate::meta::MapMetaData;

/// Sparse x/y/z-indexed storage. Coordinates are shifted by the metadata's
/// minimums; columns are only allocated once something is stored in them.
#[derive(Debug)]
pub struct SpatialIndex<T> {
    min: RoomCoords,
    dims: (usize, usize, usize),
    data: Vec<Option<Vec<Option<Vec<Option<T>>>>>>,
}

impl<T> SpatialIndex<T> {
    pub fn new(meta: &MapMetaData) -> Self {
        let span = |lo: i32, hi: i32| usize::try_from(i64::from(hi) - i64::from(lo) + 1).unwrap_or(0);
        let dims = (
            span(meta.min_x, meta.max_x),
            span(meta.min_y, meta.max_y),
            span(meta.min_z, meta.max_z),
        );
        let mut data = Vec::new();
        data.resize_with(dims.0, || None);
        Self {
            min: RoomCoords::new(meta.min_x, meta.min_y, meta.min_z),
            dims,
            data,
        }
    }

    fn zeroed(&self, c: RoomCoords) -> Option<(usize, usize, usize)> {
        let off = |v: i32, lo: i32, n: usize| {
            usize::try_from(i64::from(v) - i64::from(lo))
                .ok()
                .filter(|o| *o < n)
        };
        Some((
            off(c.x, self.min.x, self.dims.0)?,
            off(c.y, self.min.y, self.dims.1)?,
            off(c.z, self.min.z, self.dims.2)?,
        ))
    }

    pub fn contains(&self, c: RoomCoords) -> bool {
        self.zeroed(c).is_some()
    }

    pub fn get(&self, c: RoomCoords) -> Option<&T> {
        let (x, y, z) = self.zeroed(c)?;
        self.data[x].as_ref()?[y].as_ref()?[z].as_ref()
    }

    pub fn set(&mut self, c: RoomCoords, what: T) -> Result<(), MapError> {
        let (x, y, z) = self.zeroed(c).ok_or(MapError::OutOfBounds(c))?;
        let (dy, dz) = (self.dims.1, self.dims.2);
        let col = self.data[x].get_or_insert_with(|| {
            let mut v = Vec::new();
            v.resize_with(dy, || None);
            v
        });
        let cell = col[y].get_or_insert_with(|| {
            let mut v = Vec::new();
            v.resize_with(dz, || None);
            v
        });
        cell[z] = Some(what);
        Ok(())
    }
}
