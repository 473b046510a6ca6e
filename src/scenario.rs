/// 分析情境檔（JSON）
///
/// 描述障礙物圖層、觀察者與覆蓋率參考區域，供命令列工具一次載入後執行最終分析。
use geo::{coord, LineString, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use vek::Vec2;

use crate::config::AnalysisSetting;
use crate::error::Result;
use crate::state::{Orchestrator, PassHandle};

/// 多邊形的環，第一個是外環，其餘是內環
pub type Rings = Vec<Vec<[f64; 2]>>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LayerSpec {
    pub name: String,
    #[serde(default)]
    pub polygons: Vec<Rings>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObserverSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Scenario {
    #[serde(default)]
    pub spatial_reference: Option<u32>,
    #[serde(default)]
    pub analysis_distance_meters: Option<f64>,
    #[serde(default)]
    pub obstruction_layers: Vec<LayerSpec>,
    /// 指定啟用的圖層；未指定時依名稱規則
    #[serde(default)]
    pub enabled_layers: Option<Vec<String>>,
    #[serde(default)]
    pub observers: Vec<ObserverSpec>,
    /// [xmin, ymin, xmax, ymax]
    #[serde(default)]
    pub viewport: Option<[f64; 4]>,
    #[serde(default)]
    pub area_of_interest: Option<Rings>,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// 情境中的空間參考與距離覆寫設定檔
    pub fn override_setting(&self, setting: &mut AnalysisSetting) {
        if let Some(wkid) = self.spatial_reference {
            setting.spatial_reference = wkid;
        }
        if let Some(distance) = self.analysis_distance_meters {
            setting.analysis_distance_meters = distance;
        }
    }

    pub fn area_of_interest_polygon(&self) -> Option<Polygon<f64>> {
        self.area_of_interest.as_ref().and_then(|rings| to_polygon(rings))
    }

    pub fn viewport_rect(&self) -> Option<Rect<f64>> {
        self.viewport
            .map(|[xmin, ymin, xmax, ymax]| Rect::new(coord! { x: xmin, y: ymin }, coord! { x: xmax, y: ymax }))
    }

    /// 以批次載入方式套用到協調器，回傳批次結束後開始的輪次
    pub fn apply(&self, orchestrator: &mut Orchestrator) -> Result<Option<PassHandle>> {
        orchestrator.begin_bulk_load();
        let applied = self.apply_inner(orchestrator);
        let handle = orchestrator.end_bulk_load();
        applied?;
        handle
    }

    fn apply_inner(&self, orchestrator: &mut Orchestrator) -> Result<()> {
        if let Some(distance) = self.analysis_distance_meters {
            orchestrator.set_analysis_distance(distance)?;
        }

        for layer in &self.obstruction_layers {
            let polygons = layer.polygons.iter().filter_map(|rings| to_polygon(rings)).collect();
            orchestrator.add_obstruction_layer(layer.name.clone(), polygons)?;
        }
        if let Some(enabled) = &self.enabled_layers {
            for layer in &self.obstruction_layers {
                orchestrator.set_layer_enabled(&layer.name, enabled.contains(&layer.name))?;
            }
        }

        for spec in &self.observers {
            let position = Vec2::new(spec.x, spec.y);
            match &spec.name {
                Some(name) => orchestrator.add_named_observer(name.clone(), position)?,
                None => orchestrator.add_observer(position)?,
            };
        }

        if let Some(viewport) = self.viewport_rect() {
            orchestrator.set_viewport(viewport)?;
        }
        if let Some(area_of_interest) = self.area_of_interest_polygon() {
            orchestrator.track_area_of_interest(area_of_interest)?;
        }
        Ok(())
    }
}

fn to_polygon(rings: &Rings) -> Option<Polygon<f64>> {
    let mut rings = rings
        .iter()
        .filter(|ring| ring.len() >= 3)
        .map(|ring| LineString::from(ring.iter().map(|&[x, y]| coord! { x: x, y: y }).collect::<Vec<_>>()));
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}
