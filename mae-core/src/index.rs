use std::collections::HashMap;

use crate::model::{AssetRecord, TreeNode, TreeNodeType};

pub const ROOT_NODE_ID: &str = "root";

/// Search parameters after defaulting at the command layer.
#[derive(Debug, Clone)]
pub struct SearchFilter<'a> {
    pub query: &'a str,
    pub folder_node_id: Option<&'a str>,
    pub include_images: bool,
    pub include_audio: bool,
    pub include_other: bool,
    pub offset: usize,
    pub limit: usize,
}

/// All records of the active scan plus the auxiliary structures for search
/// and the virtual folder tree. Records keep insertion order; the tree map
/// is derived lazily on the first tree query and dropped on mutation.
#[derive(Default)]
pub struct ScanIndex {
    records: Vec<AssetRecord>,
    by_id: HashMap<String, usize>,
    keys_lower: Vec<String>,
    folder_ids: Vec<String>,
    tree_children: Option<HashMap<String, Vec<TreeNode>>>,
    id_aliases: HashMap<String, String>,
}

impl ScanIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<AssetRecord>) -> Self {
        let mut index = Self::new();
        index.append(&records);
        index
    }

    /// Appends records, skipping asset ids already present (a malformed
    /// archive can list one entry twice).
    pub fn append(&mut self, records: &[AssetRecord]) {
        for record in records {
            if self.by_id.contains_key(&record.asset_id) {
                continue;
            }

            self.by_id.insert(record.asset_id.clone(), self.records.len());
            self.keys_lower.push(record.key.to_lowercase());
            self.folder_ids.push(folder_node_id(record));
            self.records.push(record.clone());
        }

        self.tree_children = None;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AssetRecord] {
        &self.records
    }

    pub fn get(&self, asset_id: &str) -> Option<&AssetRecord> {
        self.by_id.get(asset_id).map(|index| &self.records[*index])
    }

    pub fn set_aliases(&mut self, aliases: HashMap<String, String>) {
        self.id_aliases = aliases;
    }

    /// Token-AND substring search over the lowercased key, restricted to a
    /// folder subtree and the kind toggles. Results keep insertion order so
    /// consecutive pagination windows concatenate without duplicates.
    pub fn search(&self, filter: &SearchFilter<'_>) -> (usize, Vec<AssetRecord>) {
        if !(filter.include_images || filter.include_audio || filter.include_other) {
            return (0, Vec::new());
        }

        let folder = filter
            .folder_node_id
            .filter(|value| !value.trim().is_empty() && *value != ROOT_NODE_ID);
        let query = filter.query.trim().to_lowercase();
        let tokens: Vec<&str> = query.split_whitespace().collect();

        let mut total = 0usize;
        let mut page = Vec::new();

        for (position, record) in self.records.iter().enumerate() {
            if !self.matches_kind(record, filter) {
                continue;
            }
            if !self.matches_folder(position, folder) {
                continue;
            }
            if !tokens.iter().all(|token| self.keys_lower[position].contains(token)) {
                continue;
            }

            if total >= filter.offset && page.len() < filter.limit {
                page.push(record.clone());
            }
            total += 1;
        }

        (total, page)
    }

    fn matches_kind(&self, record: &AssetRecord, filter: &SearchFilter<'_>) -> bool {
        if record.is_image {
            return filter.include_images;
        }
        if record.is_audio {
            return filter.include_audio;
        }
        filter.include_other
    }

    fn matches_folder(&self, position: usize, folder: Option<&str>) -> bool {
        let Some(folder) = folder else {
            return true;
        };

        let folder_id = &self.folder_ids[position];
        folder_id == folder || folder_id.starts_with(&format!("{folder}/"))
    }

    /// Children of a virtual tree node, folders first, names compared
    /// case-insensitively. Builds the tree map on first use.
    pub fn tree_children(&mut self, node_id: &str) -> Vec<TreeNode> {
        if self.tree_children.is_none() {
            self.tree_children = Some(self.build_tree());
        }

        let mut children = self
            .tree_children
            .as_ref()
            .and_then(|tree| tree.get(node_id))
            .cloned()
            .unwrap_or_default();

        children.sort_by(|left, right| {
            let rank = |node: &TreeNode| match node.node_type {
                TreeNodeType::Folder => 0,
                TreeNodeType::File => 1,
            };

            rank(left)
                .cmp(&rank(right))
                .then(left.name.to_lowercase().cmp(&right.name.to_lowercase()))
        });

        children
    }

    fn build_tree(&self) -> HashMap<String, Vec<TreeNode>> {
        let mut tree: HashMap<String, Vec<TreeNode>> = HashMap::new();
        tree.insert(ROOT_NODE_ID.to_string(), Vec::new());

        for record in &self.records {
            let mut parent_id = ROOT_NODE_ID.to_string();

            for segment in folder_segments(record) {
                let node_id = child_node_id(&parent_id, &segment);
                upsert_node(
                    &mut tree,
                    &parent_id,
                    TreeNode {
                        id: node_id.clone(),
                        name: segment,
                        node_type: TreeNodeType::Folder,
                        has_children: true,
                        asset_id: None,
                    },
                );
                tree.entry(node_id.clone()).or_default();
                parent_id = node_id;
            }

            let file_node_id = format!("{parent_id}/file:{}", record.asset_id);
            upsert_node(
                &mut tree,
                &parent_id,
                TreeNode {
                    id: file_node_id,
                    name: record.file_name(),
                    node_type: TreeNodeType::File,
                    has_children: false,
                    asset_id: Some(record.asset_id.clone()),
                },
            );
        }

        tree
    }

    /// Maps previously selected ids onto the current index. Live ids map to
    /// themselves; refresh aliases cover container replacement; the rest
    /// fall back to a structural match that must be unique.
    pub fn reconcile(&self, asset_ids: &[String]) -> (HashMap<String, String>, Vec<String>) {
        let mut structural: HashMap<(&str, &str, &str, &str), Vec<&str>> = HashMap::new();
        for record in &self.records {
            structural
                .entry((
                    record.source_name.as_str(),
                    record.namespace.as_str(),
                    record.relative_asset_path.as_str(),
                    record.extension.as_str(),
                ))
                .or_default()
                .push(record.asset_id.as_str());
        }

        let mut id_map = HashMap::new();
        let mut resolved = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for asset_id in asset_ids {
            let mapped = if self.by_id.contains_key(asset_id) {
                Some(asset_id.clone())
            } else if let Some(alias) = self
                .id_aliases
                .get(asset_id)
                .filter(|next| self.by_id.contains_key(*next))
            {
                Some(alias.clone())
            } else {
                self.structural_match(&structural, asset_id)
            };

            if let Some(mapped_id) = mapped {
                id_map.insert(asset_id.clone(), mapped_id.clone());
                if seen.insert(mapped_id.clone()) {
                    resolved.push(mapped_id);
                }
            }
        }

        (id_map, resolved)
    }

    fn structural_match(
        &self,
        structural: &HashMap<(&str, &str, &str, &str), Vec<&str>>,
        old_id: &str,
    ) -> Option<String> {
        // Structural matching needs the old record's shape; without a live
        // record the alias map is the only source, so look the id up there
        // even when its target has itself been replaced.
        let previous = self.id_aliases.get(old_id)?;
        let record = self.get(previous)?;
        let candidates = structural.get(&(
            record.source_name.as_str(),
            record.namespace.as_str(),
            record.relative_asset_path.as_str(),
            record.extension.as_str(),
        ))?;

        if candidates.len() == 1 {
            Some(candidates[0].to_string())
        } else {
            None
        }
    }

    /// Structural reconciliation between two record generations, used by the
    /// refresh sweep to keep selections stable across container replacement.
    pub fn build_alias_map(
        previous: &[AssetRecord],
        next: &[AssetRecord],
    ) -> HashMap<String, String> {
        let mut next_ids: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut next_structural: HashMap<(&str, &str, &str, &str), Vec<&str>> = HashMap::new();
        for record in next {
            next_ids.insert(record.asset_id.as_str());
            next_structural
                .entry((
                    record.source_name.as_str(),
                    record.namespace.as_str(),
                    record.relative_asset_path.as_str(),
                    record.extension.as_str(),
                ))
                .or_default()
                .push(record.asset_id.as_str());
        }

        let mut aliases = HashMap::new();
        for record in previous {
            if next_ids.contains(record.asset_id.as_str()) {
                continue;
            }

            let candidates = next_structural.get(&(
                record.source_name.as_str(),
                record.namespace.as_str(),
                record.relative_asset_path.as_str(),
                record.extension.as_str(),
            ));

            if let Some(candidates) = candidates {
                if candidates.len() == 1 {
                    aliases.insert(record.asset_id.clone(), candidates[0].to_string());
                }
            }
        }

        aliases
    }
}

/// Folder node id of the record's parent folder:
/// `root/<sourceRoot>/<sourceName>/<namespace>/<dir segments>`.
pub fn folder_node_id(record: &AssetRecord) -> String {
    let mut node_id = ROOT_NODE_ID.to_string();
    for segment in folder_segments(record) {
        node_id = child_node_id(&node_id, &segment);
    }
    node_id
}

fn folder_segments(record: &AssetRecord) -> Vec<String> {
    let mut segments = vec![
        record.source_type.tree_root_name().to_string(),
        record.source_name.clone(),
        record.namespace.clone(),
    ];

    let mut path_segments: Vec<&str> = record.relative_asset_path.split('/').collect();
    path_segments.pop();
    segments.extend(path_segments.into_iter().map(|segment| segment.to_string()));

    segments
}

fn child_node_id(parent: &str, segment: &str) -> String {
    // Segments cannot contain '/' after extraction; escape defensively so a
    // hostile source name cannot forge node ids.
    let escaped = segment.replace('/', "\u{2215}");
    format!("{parent}/{escaped}")
}

fn upsert_node(tree: &mut HashMap<String, Vec<TreeNode>>, parent_id: &str, node: TreeNode) {
    let children = tree.entry(parent_id.to_string()).or_default();
    if children.iter().any(|child| child.id == node.id) {
        return;
    }

    children.push(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetContainerType, AssetSourceType};

    fn record(
        source_name: &str,
        namespace: &str,
        relative: &str,
        is_image: bool,
        is_audio: bool,
    ) -> AssetRecord {
        let extension = relative.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        AssetRecord {
            asset_id: crate::extractor::derive_asset_id(
                &format!("/packs/{source_name}.zip"),
                &format!("assets/{namespace}/{relative}"),
            ),
            key: format!("{source_name} / {namespace} / {relative}"),
            source_type: AssetSourceType::ResourcePack,
            source_name: source_name.into(),
            namespace: namespace.into(),
            relative_asset_path: relative.into(),
            extension: extension.into(),
            is_image,
            is_audio,
            container_path: format!("/packs/{source_name}.zip"),
            container_type: AssetContainerType::Zip,
            entry_path: format!("assets/{namespace}/{relative}"),
        }
    }

    fn sample_index() -> ScanIndex {
        ScanIndex::from_records(vec![
            record("pack", "minecraft", "textures/block/stone.png", true, false),
            record("pack", "minecraft", "textures/block/stone_brick.png", true, false),
            record("pack", "minecraft", "sounds/dig/stone1.ogg", false, true),
            record("pack", "minecraft", "models/block/stone.json", false, false),
        ])
    }

    fn all_filter(query: &str) -> SearchFilter<'_> {
        SearchFilter {
            query,
            folder_node_id: None,
            include_images: true,
            include_audio: true,
            include_other: true,
            offset: 0,
            limit: usize::MAX,
        }
    }

    #[test]
    fn empty_query_with_all_kinds_matches_everything() {
        let index = sample_index();
        let (total, page) = index.search(&all_filter(""));
        assert_eq!(total, index.len());
        assert_eq!(page.len(), index.len());
    }

    #[test]
    fn multi_token_search_is_case_insensitive_and_conjunctive() {
        let index = sample_index();

        let (total, page) = index.search(&all_filter("Stone Block"));
        assert_eq!(total, 3);
        assert!(page.iter().all(|asset| asset.key.contains("stone")));

        let (ogg_total, _) = index.search(&all_filter("stone1 dig"));
        assert_eq!(ogg_total, 1);

        let (none_total, _) = index.search(&all_filter("stone granite"));
        assert_eq!(none_total, 0);
    }

    #[test]
    fn kind_filters_partition_records() {
        let index = sample_index();
        let mut filter = all_filter("");
        filter.include_audio = false;
        filter.include_other = false;
        let (images, _) = index.search(&filter);
        assert_eq!(images, 2);

        let mut filter = all_filter("");
        filter.include_images = false;
        filter.include_audio = false;
        let (other, page) = index.search(&filter);
        assert_eq!(other, 1);
        assert_eq!(page[0].extension, "json");

        let mut filter = all_filter("");
        filter.include_images = false;
        filter.include_audio = false;
        filter.include_other = false;
        assert_eq!(index.search(&filter).0, 0);
    }

    #[test]
    fn pagination_windows_concatenate_without_duplicates() {
        let index = sample_index();
        let full = index.search(&all_filter("")).1;

        let mut stitched = Vec::new();
        let mut offset = 0;
        loop {
            let mut filter = all_filter("");
            filter.offset = offset;
            filter.limit = 2;
            let (_, window) = index.search(&filter);
            if window.is_empty() {
                break;
            }
            offset += window.len();
            stitched.extend(window);
        }

        assert_eq!(stitched, full);
    }

    #[test]
    fn folder_restriction_covers_subtrees() {
        let index = sample_index();
        let folder = format!("{ROOT_NODE_ID}/resourcepacks/pack/minecraft/textures");

        let mut filter = all_filter("");
        filter.folder_node_id = Some(&folder);
        let (total, page) = index.search(&filter);
        assert_eq!(total, 2);
        assert!(page.iter().all(|asset| asset.relative_asset_path.starts_with("textures/")));
    }

    #[test]
    fn tree_drills_down_to_file_leaves() {
        let mut index = sample_index();

        let roots = index.tree_children(ROOT_NODE_ID);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "resourcepacks");
        assert_eq!(roots[0].node_type, TreeNodeType::Folder);
        assert!(roots[0].has_children);

        let block_id = format!("{ROOT_NODE_ID}/resourcepacks/pack/minecraft/textures/block");
        let leaves = index.tree_children(&block_id);
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().all(|node| node.node_type == TreeNodeType::File));
        assert_eq!(leaves[0].name, "stone.png");
        let leaf_asset = leaves[0].asset_id.as_deref().expect("file leaf has asset id");
        assert!(index.get(leaf_asset).is_some());
        assert!(leaves[0].id.starts_with(&format!("{block_id}/file:")));
    }

    #[test]
    fn folders_sort_before_files_case_insensitively() {
        let mut index = ScanIndex::from_records(vec![
            record("pack", "minecraft", "Zebra.png", true, false),
            record("pack", "minecraft", "textures/a.png", true, false),
        ]);

        let namespace_id = format!("{ROOT_NODE_ID}/resourcepacks/pack/minecraft");
        let children = index.tree_children(&namespace_id);
        assert_eq!(children[0].name, "textures");
        assert_eq!(children[0].node_type, TreeNodeType::Folder);
        assert_eq!(children[1].name, "Zebra.png");
    }

    #[test]
    fn reconcile_maps_live_ids_to_themselves() {
        let index = sample_index();
        let known = index.records()[0].asset_id.clone();
        let (id_map, resolved) =
            index.reconcile(&[known.clone(), "missing-id".to_string(), known.clone()]);

        assert_eq!(id_map.get(&known), Some(&known));
        assert!(!id_map.contains_key("missing-id"));
        assert_eq!(resolved, vec![known]);
    }

    #[test]
    fn alias_map_matches_replaced_containers_structurally() {
        let previous = vec![record("old-pack", "minecraft", "textures/block/stone.png", true, false)];
        let mut renamed = previous[0].clone();
        renamed.container_path = "/packs/renamed.zip".into();
        renamed.asset_id =
            crate::extractor::derive_asset_id(&renamed.container_path, &renamed.entry_path);

        let aliases = ScanIndex::build_alias_map(&previous, &[renamed.clone()]);
        assert_eq!(aliases.get(&previous[0].asset_id), Some(&renamed.asset_id));

        let mut index = ScanIndex::from_records(vec![renamed.clone()]);
        index.set_aliases(aliases);
        let (id_map, resolved) = index.reconcile(&[previous[0].asset_id.clone()]);
        assert_eq!(id_map.get(&previous[0].asset_id), Some(&renamed.asset_id));
        assert_eq!(resolved, vec![renamed.asset_id]);
    }

    #[test]
    fn ambiguous_structural_matches_stay_unknown() {
        let previous = vec![record("pack", "minecraft", "textures/block/stone.png", true, false)];
        let mut copy_a = previous[0].clone();
        copy_a.container_path = "/packs/a.zip".into();
        copy_a.asset_id = crate::extractor::derive_asset_id(&copy_a.container_path, &copy_a.entry_path);
        let mut copy_b = previous[0].clone();
        copy_b.container_path = "/packs/b.zip".into();
        copy_b.asset_id = crate::extractor::derive_asset_id(&copy_b.container_path, &copy_b.entry_path);

        let aliases = ScanIndex::build_alias_map(&previous, &[copy_a, copy_b]);
        assert!(aliases.is_empty());
    }
}
