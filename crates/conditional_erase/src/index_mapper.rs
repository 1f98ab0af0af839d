//! Derives, for a main table, the synchronous indexes an erase must keep in
//! step and how their implementation-table columns line up with the main
//! table's columns.
//!
//! Two kinds of failure are distinguished. A key column that does not resolve
//! to a live column returns an error: the caller skips the table for this
//! cycle. A broken catalog structure (dangling child path, index without an
//! index record, index without exactly one live implementation table, two live
//! columns with the same name) is corruption and panics.

use std::collections::{
    BTreeMap,
    BTreeSet,
};

use catalog::{
    Catalog,
    IndexKind,
    TableIndexInfo,
    TableInfo,
};
use common::types::{
    ColumnId,
    PathId,
};

use crate::types::{
    IndexDescriptor,
    KeyMapEntry,
};

pub fn make_indexes(catalog: &Catalog, main_path_id: PathId) -> anyhow::Result<Vec<IndexDescriptor>> {
    let main_path = catalog
        .path(main_path_id)
        .unwrap_or_else(|| panic!("Main table path {main_path_id} is missing"));
    let main_table = catalog
        .table(main_path_id)
        .unwrap_or_else(|| panic!("Main table {main_path_id} is missing"));

    let mut result: BTreeMap<(PathId, u64), Vec<KeyMapEntry>> = BTreeMap::new();
    for (name, child_id) in main_path.children() {
        let child = catalog
            .path(child_id)
            .unwrap_or_else(|| panic!("Child {name} ({child_id}) of {main_path_id} is missing"));
        if !child.is_table_index() || child.dropped() {
            continue;
        }
        let index = catalog
            .index(child_id)
            .unwrap_or_else(|| panic!("Index {child_id} has no index record"));
        if index.kind == IndexKind::GlobalAsync {
            continue;
        }
        let (impl_id, impl_table) = index_impl_table(catalog, child_id);
        let key_map = make_column_ids(main_table, index, impl_table)
            .map_err(|e| e.context(format!("Index {name} ({child_id}) of {main_path_id}")))?;
        let previous = result.insert((impl_id, impl_table.alter_version), key_map);
        assert!(
            previous.is_none(),
            "Index implementation table {impl_id} mapped twice"
        );
    }
    Ok(result
        .into_iter()
        .map(|((index_table, schema_version), key_map)| IndexDescriptor {
            index_table,
            schema_version,
            key_map,
        })
        .collect())
}

fn index_impl_table(catalog: &Catalog, index_path_id: PathId) -> (PathId, &TableInfo) {
    let index_path = catalog
        .path(index_path_id)
        .unwrap_or_else(|| panic!("Index path {index_path_id} is missing"));
    assert_eq!(
        index_path.num_children(),
        1,
        "Index {index_path_id} must have exactly one implementation table"
    );
    let (_, impl_id) = index_path
        .children()
        .next()
        .unwrap_or_else(|| panic!("Index {index_path_id} has no children"));
    let impl_path = catalog
        .path(impl_id)
        .unwrap_or_else(|| panic!("Index implementation path {impl_id} is missing"));
    assert!(
        !impl_path.dropped(),
        "Index implementation table {impl_id} of a live index is dropped"
    );
    let impl_table = catalog
        .table(impl_id)
        .unwrap_or_else(|| panic!("Index implementation table {impl_id} has no table record"));
    (impl_id, impl_table)
}

fn make_column_ids(
    main_table: &TableInfo,
    index: &TableIndexInfo,
    impl_table: &TableInfo,
) -> anyhow::Result<Vec<KeyMapEntry>> {
    let main_columns = column_name_to_id(main_table);
    let impl_columns = column_name_to_id(impl_table);
    let mut result = vec![];
    let mut covered = BTreeSet::new();

    for key in &index.keys {
        let (Some(&main_column_id), Some(&index_column_id)) =
            (main_columns.get(key.as_str()), impl_columns.get(key.as_str()))
        else {
            anyhow::bail!("Index key column {key} does not resolve in both tables");
        };
        result.push(KeyMapEntry {
            index_column_id,
            main_column_id,
        });
        covered.insert(key.as_str());
    }

    for main_column_id in &main_table.key_column_ids {
        let Some(column) = main_table
            .columns
            .get(main_column_id)
            .filter(|c| !c.dropped)
        else {
            anyhow::bail!("Key column {main_column_id} is not a live column of the main table");
        };
        if covered.contains(column.name.as_str()) {
            continue;
        }
        let Some(&index_column_id) = impl_columns.get(column.name.as_str()) else {
            anyhow::bail!(
                "Key column {} is missing from the index implementation table",
                column.name
            );
        };
        result.push(KeyMapEntry {
            index_column_id,
            main_column_id: *main_column_id,
        });
    }
    Ok(result)
}

fn column_name_to_id(table: &TableInfo) -> BTreeMap<&str, ColumnId> {
    let mut result = BTreeMap::new();
    for (id, column) in &table.columns {
        if column.dropped {
            continue;
        }
        let previous = result.insert(column.name.as_str(), *id);
        assert!(previous.is_none(), "Duplicate live column {}", column.name);
    }
    result
}
