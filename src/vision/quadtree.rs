use geo::Rect;
use vek::Vec2;

/// 四叉樹節點
#[derive(Debug, Clone)]
pub struct QuadTreeNode {
    /// 節點邊界
    pub bounds: Bounds,
    /// 子節點（NW, NE, SW, SE）
    pub children: Option<Box<[QuadTreeNode; 4]>>,
    /// 存儲的障礙物（索引與外框）
    pub items: Vec<(usize, Bounds)>,
    /// 節點深度
    pub depth: usize,
}

/// 邊界矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec2<f64>,
    pub max: Vec2<f64>,
}

impl Bounds {
    pub fn new(min: Vec2<f64>, max: Vec2<f64>) -> Self {
        Self { min, max }
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y
    }

    /// 包含兩者的最小邊界
    pub fn merge(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: Vec2::partial_min(self.min, other.min),
            max: Vec2::partial_max(self.max, other.max),
        }
    }
}

impl From<Rect<f64>> for Bounds {
    fn from(rect: Rect<f64>) -> Self {
        Bounds {
            min: Vec2::new(rect.min().x, rect.min().y),
            max: Vec2::new(rect.max().x, rect.max().y),
        }
    }
}

/// 障礙物空間索引，用於快速篩選搜尋圓附近的障礙物
#[derive(Debug, Clone)]
pub struct QuadTree {
    pub root: Option<QuadTreeNode>,
    pub max_tree_depth: usize,
    pub max_items_per_node: usize,
}

impl QuadTree {
    pub fn new(max_tree_depth: usize, max_items_per_node: usize) -> Self {
        Self {
            root: None,
            max_tree_depth,
            max_items_per_node,
        }
    }

    /// 初始化四叉樹
    pub fn initialize(&mut self, world_bounds: Bounds, items: Vec<(usize, Bounds)>) {
        let mut root = QuadTreeNode {
            bounds: world_bounds,
            children: None,
            items,
            depth: 0,
        };

        self.subdivide_node(&mut root);
        self.root = Some(root);
    }

    /// 遞歸細分節點
    fn subdivide_node(&self, node: &mut QuadTreeNode) {
        if node.items.len() <= self.max_items_per_node ||
           node.depth >= self.max_tree_depth {
            return;
        }

        let bounds = node.bounds;
        let mid_x = (bounds.min.x + bounds.max.x) * 0.5;
        let mid_y = (bounds.min.y + bounds.max.y) * 0.5;
        let depth = node.depth + 1;
        let child = |min: Vec2<f64>, max: Vec2<f64>| QuadTreeNode {
            bounds: Bounds { min, max },
            children: None,
            items: Vec::new(),
            depth,
        };

        let mut children = Box::new([
            // 西北
            child(Vec2::new(bounds.min.x, mid_y), Vec2::new(mid_x, bounds.max.y)),
            // 東北
            child(Vec2::new(mid_x, mid_y), bounds.max),
            // 西南
            child(bounds.min, Vec2::new(mid_x, mid_y)),
            // 東南
            child(Vec2::new(mid_x, bounds.min.y), Vec2::new(bounds.max.x, mid_y)),
        ]);

        // 跨越邊界的障礙物會同時放入多個子節點
        for item in &node.items {
            for child in children.iter_mut() {
                if item.1.intersects(&child.bounds) {
                    child.items.push(*item);
                }
            }
        }

        node.children = Some(children);
        node.items.clear();

        if let Some(ref mut children) = node.children {
            for child in children.iter_mut() {
                self.subdivide_node(child);
            }
        }
    }

    /// 查詢與範圍相交的障礙物索引（已排序、去重）
    pub fn query(&self, query_bounds: &Bounds) -> Vec<usize> {
        let mut results = Vec::new();

        if let Some(ref tree) = self.root {
            self.query_node_recursive(tree, query_bounds, &mut results);
        }

        results.sort_unstable();
        results.dedup();
        results
    }

    fn query_node_recursive(&self, node: &QuadTreeNode, query_bounds: &Bounds, results: &mut Vec<usize>) {
        if !node.bounds.intersects(query_bounds) {
            return;
        }

        for (index, bounds) in &node.items {
            if bounds.intersects(query_bounds) {
                results.push(*index);
            }
        }

        if let Some(ref children) = node.children {
            for child in children.iter() {
                self.query_node_recursive(child, query_bounds, results);
            }
        }
    }

    /// 計算四叉樹節點數量
    pub fn count_nodes(&self) -> usize {
        if let Some(ref root) = self.root {
            Self::count_nodes_recursive(root)
        } else {
            0
        }
    }

    fn count_nodes_recursive(node: &QuadTreeNode) -> usize {
        let mut count = 1;
        if let Some(ref children) = node.children {
            for child in children.iter() {
                count += Self::count_nodes_recursive(child);
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(x: f64, y: f64) -> Bounds {
        Bounds::new(Vec2::new(x, y), Vec2::new(x + 1.0, y + 1.0))
    }

    #[test]
    fn test_query_after_subdivision() {
        let items: Vec<(usize, Bounds)> = (0..64)
            .map(|i| (i, cell((i % 8) as f64 * 10.0, (i / 8) as f64 * 10.0)))
            .collect();
        let world = Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(80.0, 80.0));

        let mut tree = QuadTree::new(6, 4);
        tree.initialize(world, items);
        assert!(tree.count_nodes() > 1, "應該有細分");

        let hits = tree.query(&Bounds::new(Vec2::new(-1.0, -1.0), Vec2::new(11.5, 0.5)));
        assert_eq!(hits, vec![0, 1]);

        let none = tree.query(&Bounds::new(Vec2::new(200.0, 200.0), Vec2::new(210.0, 210.0)));
        assert!(none.is_empty());
    }

    #[test]
    fn test_straddling_item_reported_once() {
        let items = vec![(7, Bounds::new(Vec2::new(35.0, 35.0), Vec2::new(45.0, 45.0)))];
        let world = Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(80.0, 80.0));
        let mut tree = QuadTree::new(4, 0);
        tree.initialize(world, items);

        let hits = tree.query(&Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(80.0, 80.0)));
        assert_eq!(hits, vec![7]);
    }
}
