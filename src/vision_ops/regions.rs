use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};

/// A connected set of mask pixels, described by its bounding rectangle and pixel area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: u64,
}

impl Region {
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

#[derive(Clone, Copy)]
struct Extent {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u64,
}

/// Regions of a mask that survived the area filter, plus the mask restricted to them.
#[derive(Debug, Clone)]
pub struct RegionSet {
    /// Sorted by descending area, label order on ties.
    pub regions: Vec<Region>,
    pub mask: GrayImage,
}

impl RegionSet {
    pub fn largest(&self) -> Option<&Region> {
        self.regions.first()
    }

    pub fn pixel_count(&self) -> u64 {
        self.regions.iter().map(|r| r.area).sum()
    }
}

/// Labels the 8-connected regions of `mask` and drops those with fewer than `min_area`
/// pixels.
pub fn extract_regions(mask: &GrayImage, min_area: u64) -> RegionSet {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut extents: Vec<Option<Extent>> = Vec::new();
    for (x, y, Luma([label])) in labels.enumerate_pixels() {
        if *label == 0 {
            continue;
        }
        let index = *label as usize;
        if extents.len() <= index {
            extents.resize(index + 1, None);
        }
        let extent = extents[index].get_or_insert(Extent {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
        });
        extent.min_x = extent.min_x.min(x);
        extent.min_y = extent.min_y.min(y);
        extent.max_x = extent.max_x.max(x);
        extent.max_y = extent.max_y.max(y);
        extent.area += 1;
    }

    let kept = |label: u32| {
        extents
            .get(label as usize)
            .copied()
            .flatten()
            .is_some_and(|e| e.area >= min_area)
    };
    let retained = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let label = labels.get_pixel(x, y)[0];
        if label != 0 && kept(label) {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let mut regions = extents
        .iter()
        .flatten()
        .filter(|e| e.area >= min_area)
        .map(|e| Region {
            x: e.min_x,
            y: e.min_y,
            width: e.max_x - e.min_x + 1,
            height: e.max_y - e.min_y + 1,
            area: e.area,
        })
        .collect::<Vec<_>>();
    regions.sort_by(|a, b| b.area.cmp(&a.area));

    RegionSet {
        regions,
        mask: retained,
    }
}
