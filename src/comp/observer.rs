/// 觀察者（Blue Light 位置）
use geo::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use vek::Vec2;

use crate::vision::spatial_ref::SpatialReference;

/// 觀察者唯一識別碼，建立後不會重複使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        ObserverId(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub id: ObserverId,
    /// 顯示名稱
    pub name: String,
    /// 目前空間參考下的位置
    pub position: Vec2<f64>,
    pub spatial_reference: SpatialReference,
}

impl Observer {
    /// 以位置文字作為預設名稱
    pub fn new(position: Vec2<f64>, spatial_reference: SpatialReference) -> Self {
        Self {
            id: ObserverId::new(),
            name: Self::location_text(position, spatial_reference),
            position,
            spatial_reference,
        }
    }

    pub fn named(name: impl Into<String>, position: Vec2<f64>, spatial_reference: SpatialReference) -> Self {
        Self {
            id: ObserverId::new(),
            name: name.into(),
            position,
            spatial_reference,
        }
    }

    pub fn coord(&self) -> Coord<f64> {
        Coord { x: self.position.x, y: self.position.y }
    }

    /// 移動位置；自動產生的名稱會跟著更新
    pub fn move_to(&mut self, position: Vec2<f64>) {
        if self.has_generated_name() {
            self.name = Self::location_text(position, self.spatial_reference);
        }
        self.position = position;
    }

    pub fn has_generated_name(&self) -> bool {
        self.name.starts_with("Lon:")
    }

    fn location_text(position: Vec2<f64>, sr: SpatialReference) -> String {
        let lonlat = sr.to_geographic(Coord { x: position.x, y: position.y });
        format!("Lon:{:.5} Lat:{:.5}", lonlat.x, lonlat.y)
    }
}

/// 觀察者集合，維持加入順序
#[derive(Debug, Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Observer>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, observer: Observer) -> ObserverId {
        let id = observer.id;
        self.observers.push(observer);
        id
    }

    pub fn get(&self, id: ObserverId) -> Option<&Observer> {
        self.observers.iter().find(|o| o.id == id)
    }

    pub fn get_mut(&mut self, id: ObserverId) -> Option<&mut Observer> {
        self.observers.iter_mut().find(|o| o.id == id)
    }

    pub fn remove(&mut self, id: ObserverId) -> Option<Observer> {
        let index = self.observers.iter().position(|o| o.id == id)?;
        Some(self.observers.remove(index))
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observer> {
        self.observers.iter()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// 分析開始時的快照
    pub fn snapshot(&self) -> Vec<Observer> {
        self.observers.clone()
    }
}
