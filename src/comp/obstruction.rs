/// 障礙物與障礙物圖層
use geo::{BoundingRect, Intersects, MultiPolygon, Polygon};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vek::Vec2;

use crate::error::{AnalysisError, Result};
use crate::vision::quadtree::{Bounds, QuadTree};
use crate::vision::spatial_ref::SpatialReference;

lazy_static! {
    /// 預設勾選的障礙物圖層名稱
    static ref DEFAULT_CANDIDATE_LAYER: Regex =
        Regex::new(DEFAULT_CANDIDATE_PATTERN).unwrap();
}

pub const DEFAULT_CANDIDATE_PATTERN: &str = "(?i)building|footprint|obstruction|tree";

/// 遮擋視線的多邊形，載入後不再變動
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstruction {
    /// 來源圖層名稱
    pub source: String,
    pub spatial_reference: SpatialReference,
    pub geometry: MultiPolygon<f64>,
}

impl Obstruction {
    pub fn new(
        source: impl Into<String>,
        spatial_reference: SpatialReference,
        geometry: impl Into<MultiPolygon<f64>>,
    ) -> Self {
        Self {
            source: source.into(),
            spatial_reference,
            geometry: geometry.into(),
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.geometry.bounding_rect().map(Bounds::from)
    }
}

/// 目前生效的障礙物清單與空間索引
#[derive(Debug, Clone)]
pub struct ObstructionSet {
    spatial_reference: SpatialReference,
    obstructions: Vec<Obstruction>,
    index: QuadTree,
}

impl ObstructionSet {
    pub fn empty(spatial_reference: SpatialReference) -> Self {
        Self {
            spatial_reference,
            obstructions: Vec::new(),
            index: QuadTree::new(8, 10),
        }
    }

    /// 建立清單並建立四叉樹；空間參考不一致時失敗
    pub fn new(spatial_reference: SpatialReference, obstructions: Vec<Obstruction>) -> Result<Self> {
        for obstruction in &obstructions {
            spatial_reference.ensure_same(obstruction.spatial_reference)?;
        }

        let items: Vec<(usize, Bounds)> = obstructions
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.bounds().map(|b| (i, b)))
            .collect();

        let mut index = QuadTree::new(8, 10);
        if let Some(world) = items.iter().map(|(_, b)| *b).reduce(|a, b| a.merge(&b)) {
            index.initialize(world, items);
        }

        Ok(Self {
            spatial_reference,
            obstructions,
            index,
        })
    }

    pub fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    pub fn len(&self) -> usize {
        self.obstructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstructions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Obstruction> {
        self.obstructions.iter()
    }

    /// 與搜尋區域相交的障礙物索引
    ///
    /// 先以四叉樹過濾外框，再做精確的相交判斷。
    pub fn candidate_indices(&self, search_area: &Polygon<f64>) -> Vec<usize> {
        let Some(area_bounds) = search_area.bounding_rect().map(Bounds::from) else {
            return Vec::new();
        };

        self.index
            .query(&area_bounds)
            .into_iter()
            .filter(|&i| self.obstructions[i].geometry.intersects(search_area))
            .collect()
    }

    pub fn candidates(&self, search_area: &Polygon<f64>) -> Vec<&Obstruction> {
        self.resolve(&self.candidate_indices(search_area))
    }

    pub fn resolve(&self, indices: &[usize]) -> Vec<&Obstruction> {
        indices.iter().filter_map(|&i| self.obstructions.get(i)).collect()
    }

    /// 任一障礙物包含此點
    pub fn covers_point(&self, point: Vec2<f64>) -> bool {
        let query = Bounds::new(point, point);
        let location = geo::Point::new(point.x, point.y);
        self.index
            .query(&query)
            .into_iter()
            .any(|i| self.obstructions[i].geometry.intersects(&location))
    }
}

/// 依來源圖層分組的障礙物，並記錄哪些圖層被啟用
#[derive(Debug, Clone)]
pub struct ObstructionCatalog {
    spatial_reference: SpatialReference,
    layers: Vec<(String, Vec<Obstruction>)>,
    enabled: BTreeSet<String>,
    candidate_pattern: Regex,
}

impl ObstructionCatalog {
    pub fn new(spatial_reference: SpatialReference) -> Self {
        Self {
            spatial_reference,
            layers: Vec::new(),
            enabled: BTreeSet::new(),
            candidate_pattern: DEFAULT_CANDIDATE_LAYER.clone(),
        }
    }

    /// 自訂預設啟用圖層的名稱規則
    pub fn with_pattern(spatial_reference: SpatialReference, pattern: &str) -> Result<Self> {
        let candidate_pattern =
            Regex::new(pattern).map_err(|e| AnalysisError::InvalidLayerPattern(e.to_string()))?;
        Ok(Self {
            candidate_pattern,
            ..Self::new(spatial_reference)
        })
    }

    /// 新增（或取代）圖層；名稱符合規則時預設啟用
    ///
    /// 回傳此圖層是否為啟用狀態。
    pub fn add_layer(&mut self, name: impl Into<String>, polygons: Vec<Polygon<f64>>) -> bool {
        let name = name.into();
        let obstructions = polygons
            .into_iter()
            .map(|p| Obstruction::new(name.clone(), self.spatial_reference, p))
            .collect();

        match self.layers.iter_mut().find(|(n, _)| *n == name) {
            Some(layer) => layer.1 = obstructions,
            None => {
                if self.candidate_pattern.is_match(&name) {
                    self.enabled.insert(name.clone());
                }
                self.layers.push((name.clone(), obstructions));
            }
        }

        self.enabled.contains(&name)
    }

    /// 移除圖層；不存在時回傳 None，否則回傳移除前是否啟用
    pub fn remove_layer(&mut self, name: &str) -> Option<bool> {
        let index = self.layers.iter().position(|(n, _)| n == name)?;
        self.layers.remove(index);
        Some(self.enabled.remove(name))
    }

    /// 切換圖層啟用狀態，回傳是否有變動
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        if !self.layers.iter().any(|(n, _)| n == name) {
            return false;
        }
        if enabled {
            self.enabled.insert(name.to_string())
        } else {
            self.enabled.remove(name)
        }
    }

    pub fn enabled_layers(&self) -> Vec<&str> {
        self.layers
            .iter()
            .filter(|(n, _)| self.enabled.contains(n))
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// 把啟用圖層攤平成新的障礙物清單
    pub fn build_set(&self) -> Result<ObstructionSet> {
        let obstructions = self
            .layers
            .iter()
            .filter(|(n, _)| self.enabled.contains(n))
            .flat_map(|(_, obstructions)| obstructions.iter().cloned())
            .collect();

        ObstructionSet::new(self.spatial_reference, obstructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size)
        ]
    }

    #[test]
    fn test_default_enabled_layers() {
        let mut catalog = ObstructionCatalog::new(SpatialReference::WGS84);
        assert!(catalog.add_layer("Building Footprints", vec![square(0.0, 0.0, 1.0)]));
        assert!(catalog.add_layer("Street TREES", vec![square(5.0, 5.0, 1.0)]));
        assert!(!catalog.add_layer("Parcels", vec![square(10.0, 10.0, 1.0)]));

        assert_eq!(catalog.enabled_layers(), vec!["Building Footprints", "Street TREES"]);
        assert_eq!(catalog.build_set().unwrap().len(), 2);

        assert!(catalog.set_enabled("Parcels", true));
        assert!(!catalog.set_enabled("Parcels", true));
        assert!(!catalog.set_enabled("Missing", true));
        assert_eq!(catalog.build_set().unwrap().len(), 3);

        assert_eq!(catalog.remove_layer("Street TREES"), Some(true));
        assert_eq!(catalog.remove_layer("Street TREES"), None);
        assert_eq!(catalog.enabled_layers(), vec!["Building Footprints", "Parcels"]);
        assert_eq!(catalog.build_set().unwrap().len(), 2);
    }

    #[test]
    fn test_candidates_filtered_by_search_area() {
        let obstructions = (0..20)
            .map(|i| Obstruction::new("b", SpatialReference::WGS84, square(i as f64 * 3.0, 0.0, 1.0)))
            .collect();
        let set = ObstructionSet::new(SpatialReference::WGS84, obstructions).unwrap();

        let area = square(-0.5, -0.5, 5.0);
        assert_eq!(set.candidate_indices(&area), vec![0, 1]);
        assert!(set.covers_point(Vec2::new(3.5, 0.5)));
        assert!(!set.covers_point(Vec2::new(2.0, 0.5)));
    }

    #[test]
    fn test_mismatched_spatial_reference_rejected() {
        let obstruction = Obstruction::new("b", SpatialReference::WEB_MERCATOR, square(0.0, 0.0, 1.0));
        let err = ObstructionSet::new(SpatialReference::WGS84, vec![obstruction]).unwrap_err();
        assert_eq!(err, AnalysisError::GeometryMismatch { expected: 4326, found: 3857 });
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(ObstructionCatalog::with_pattern(SpatialReference::WGS84, "(").is_err());
    }
}
