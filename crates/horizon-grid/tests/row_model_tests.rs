//! Tests for the client-side row model pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use horizon_grid::{
    CellValue, ClientSideRowModel, ColumnDef, ColumnFilter, FilterModel, GridError, GridOptions,
    ModelUpdated, RefreshStage, RowTransaction, SortModelItem,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{Value, json};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("horizon_grid=debug")
        .with_test_writer()
        .try_init();
}

fn model_with(options: GridOptions, columns: Vec<ColumnDef>) -> ClientSideRowModel<Value> {
    ClientSideRowModel::builder()
        .options(options)
        .columns(columns)
        .row_id(|row: &Value| row["id"].as_str().unwrap_or_default().to_string())
        .build()
        .unwrap()
}

fn leaf_ids(model: &ClientSideRowModel<Value>) -> Vec<String> {
    let root = model.node(model.root()).unwrap();
    root.all_leaf_children
        .iter()
        .map(|k| model.node(*k).unwrap().id.clone())
        .collect()
}

fn displayed_ids(model: &ClientSideRowModel<Value>) -> Vec<String> {
    model
        .displayed_rows()
        .iter()
        .map(|k| model.node(*k).unwrap().id.clone())
        .collect()
}

#[test]
fn test_aggregation_sum_and_avg() {
    init_tracing();
    let mut model = model_with(
        GridOptions::default(),
        vec![
            ColumnDef::new("g").row_group(),
            ColumnDef::new("v").agg("sum"),
            ColumnDef {
                field: Some("v".into()),
                ..ColumnDef::new("v_avg")
            }
            .agg("avg"),
        ],
    );
    let rows = (1..=4).map(|v| json!({ "id": v.to_string(), "g": "x", "v": v })).collect();
    assert!(model.set_row_data(rows).is_empty());

    let group = model.row_at(0).unwrap();
    let node = model.node(group).unwrap();
    assert_eq!(node.agg_data.get("v"), Some(&CellValue::Int(10)));
    assert_eq!(node.agg_data.get("v_avg"), Some(&CellValue::Float(2.5)));
}

#[test]
fn test_unknown_agg_func_yields_null() {
    init_tracing();
    let mut model = model_with(
        GridOptions::default(),
        vec![ColumnDef::new("g").row_group(), ColumnDef::new("v").agg("median")],
    );
    model.set_row_data(vec![json!({ "id": "1", "g": "x", "v": 1 })]);
    let group = model.row_at(0).unwrap();
    assert_eq!(model.node(group).unwrap().agg_data.get("v"), Some(&CellValue::Null));
}

#[test]
fn test_filter_then_count() {
    init_tracing();
    let mut model = model_with(GridOptions::default(), vec![ColumnDef::new("value")]);
    let values = [1, 2, 3, 4, 5, 1, 2, 6, 7, 8];
    let rows = values
        .iter()
        .enumerate()
        .map(|(i, v)| json!({ "id": i.to_string(), "value": v }))
        .collect();
    model.set_row_data(rows);

    let issues = model.set_filter_model(
        FilterModel::new().with("value", ColumnFilter::GreaterThan { filter: 5.into() }),
    );
    assert!(issues.is_empty());
    let root = model.node(model.root()).unwrap();
    assert_eq!(root.children_after_filter.len(), 3);
    assert_eq!(model.row_count(), 3);
}

#[test]
fn test_invalid_filter_is_reported_and_ignored() {
    init_tracing();
    let mut model = model_with(GridOptions::default(), vec![ColumnDef::new("value")]);
    model.set_row_data(vec![json!({ "id": "1", "value": 1 }), json!({ "id": "2", "value": 9 })]);

    let issues = model.set_filter_model(FilterModel::new().with(
        "value",
        ColumnFilter::InRange {
            filter: 9.into(),
            filter_to: 1.into(),
        },
    ));
    assert_eq!(issues.len(), 1);
    assert!(matches!(issues[0], GridError::InvalidFilter { .. }));
    assert_eq!(model.row_count(), 2);
}

#[test]
fn test_duplicate_id_keeps_one_node() {
    init_tracing();
    let mut model = model_with(GridOptions::default(), vec![ColumnDef::new("v")]);
    let errors = model.set_row_data(vec![json!({ "id": "A", "v": 1 }), json!({ "id": "A", "v": 2 })]);

    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], GridError::DuplicateRowId { id } if id == "A"));
    assert_eq!(leaf_ids(&model), ["A"]);
    assert!(model.get_row_node("A").is_some());
}

#[test]
fn test_regrouping_preserves_group_identity() {
    init_tracing();
    let mut model = model_with(
        GridOptions::default(),
        vec![ColumnDef::new("country").row_group(), ColumnDef::new("gold").agg("sum")],
    );
    model.set_row_data(vec![
        json!({ "id": "1", "country": "US", "gold": 1 }),
        json!({ "id": "2", "country": "UK", "gold": 2 }),
    ]);
    let before: Vec<(String, Option<String>, u64)> = model
        .displayed_rows()
        .iter()
        .map(|k| {
            let n = model.node(*k).unwrap();
            (n.id.clone(), n.key.clone(), n.object_id)
        })
        .collect();

    model.set_row_group_columns(&["country".to_string()]).unwrap();
    let after: Vec<(String, Option<String>, u64)> = model
        .displayed_rows()
        .iter()
        .map(|k| {
            let n = model.node(*k).unwrap();
            (n.id.clone(), n.key.clone(), n.object_id)
        })
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_transaction_update_and_remove() {
    init_tracing();
    let mut model = model_with(
        GridOptions::default(),
        vec![ColumnDef::new("country").row_group(), ColumnDef::new("gold").agg("sum")],
    );
    model.set_row_data(vec![
        json!({ "id": "1", "country": "US", "gold": 1 }),
        json!({ "id": "2", "country": "UK", "gold": 2 }),
    ]);

    let result = model.apply_transaction(
        RowTransaction::new()
            .update([json!({ "id": "1", "country": "UK", "gold": 5 })])
            .remove([json!({ "id": "9" })]),
    );
    assert_eq!(result.errors.len(), 1);
    assert!(matches!(&result.errors[0], GridError::RowNotFound { id } if id == "9"));

    // US lost its only row, UK now holds both
    assert_eq!(displayed_ids(&model), ["row-group-country-UK"]);
    assert_eq!(model.value(model.row_at(0).unwrap(), "gold"), CellValue::Int(7));
}

#[test]
fn test_pivot_mode_generates_result_columns() {
    init_tracing();
    let mut model = model_with(
        GridOptions {
            pivot_mode: true,
            ..Default::default()
        },
        vec![
            ColumnDef::new("country").row_group(),
            ColumnDef::new("sport").pivot(),
            ColumnDef::new("gold").agg("sum"),
        ],
    );
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    model.signals().pivot_columns_changed.connect(move |cols| {
        sink.lock().push(cols.len());
    });

    model.set_row_data(vec![
        json!({ "id": "1", "country": "US", "sport": "Swim", "gold": 1 }),
        json!({ "id": "2", "country": "US", "sport": "Run", "gold": 3 }),
        json!({ "id": "3", "country": "UK", "sport": "Swim", "gold": 4 }),
    ]);

    let ids: Vec<&str> = model.pivot_result_columns().iter().map(|c| c.col_id.as_str()).collect();
    assert_eq!(ids, ["Run_gold", "Swim_gold"]);
    assert_eq!(*changes.lock(), [2]);

    // leaves are hidden in pivot mode
    assert_eq!(model.row_count(), 2);
    let us = model.row_at(0).unwrap();
    assert_eq!(model.value(us, "Swim_gold"), CellValue::Int(1));
    assert_eq!(model.value(us, "Run_gold"), CellValue::Int(3));
    let uk = model.row_at(1).unwrap();
    assert_eq!(model.value(uk, "Run_gold"), CellValue::Null);
}

#[test]
fn test_tree_data_with_filler() {
    init_tracing();
    let mut model = ClientSideRowModel::<Value>::builder()
        .options(GridOptions {
            tree_data: true,
            ..Default::default()
        })
        .tree_data_path(|row: &Value| {
            row["path"]
                .as_array()
                .map(|p| p.iter().filter_map(|s| s.as_str().map(String::from)).collect())
                .unwrap_or_default()
        })
        .build()
        .unwrap();
    let errors = model.set_row_data(vec![
        json!({ "path": ["A"] }),
        json!({ "path": ["A", "B"] }),
        json!({ "path": ["C", "D"] }),
    ]);
    assert!(errors.is_empty());
    model.expand_all(true);

    let keys: Vec<String> = model
        .displayed_rows()
        .iter()
        .map(|k| model.node(*k).unwrap().key.clone().unwrap_or_default())
        .collect();
    assert_eq!(keys, ["A", "B", "C", "D"]);

    let c = model.node(model.row_at(2).unwrap()).unwrap();
    assert!(c.filler);
    assert!(c.data.is_none());
    let a = model.node(model.row_at(0).unwrap()).unwrap();
    assert!(a.group && a.data.is_some());
}

fn tree_model() -> ClientSideRowModel<Value> {
    ClientSideRowModel::<Value>::builder()
        .options(GridOptions {
            tree_data: true,
            group_default_expanded: -1,
            ..Default::default()
        })
        .row_id(|row: &Value| row["id"].as_str().unwrap_or_default().to_string())
        .tree_data_path(|row: &Value| {
            row["path"]
                .as_array()
                .map(|p| p.iter().filter_map(|s| s.as_str().map(String::from)).collect())
                .unwrap_or_default()
        })
        .build()
        .unwrap()
}

/// Display ids after loading `rows` from scratch.
fn reloaded_ids(mut model: ClientSideRowModel<Value>, rows: Vec<Value>) -> Vec<String> {
    model.set_row_data(rows);
    displayed_ids(&model)
}

#[test]
fn test_tree_data_add_takes_over_filler() {
    init_tracing();
    let child = json!({ "id": "a", "path": ["A", "B"] });
    let parent = json!({ "id": "p", "path": ["A"] });

    let mut model = tree_model();
    model.set_row_data(vec![child.clone()]);
    assert_eq!(displayed_ids(&model), ["row-group-A", "a"]);

    let result = model.apply_transaction(RowTransaction::new().add([parent.clone()]));
    assert!(result.errors.is_empty());
    assert_eq!(displayed_ids(&model), ["p", "a"]);
    assert_eq!(displayed_ids(&model), reloaded_ids(tree_model(), vec![child, parent]));
}

#[test]
fn test_tree_data_remove_parent_leaves_filler() {
    init_tracing();
    let parent = json!({ "id": "p", "path": ["A"] });
    let child = json!({ "id": "a", "path": ["A", "B"] });

    let mut model = tree_model();
    model.set_row_data(vec![parent.clone(), child.clone()]);
    assert_eq!(displayed_ids(&model), ["p", "a"]);

    model.apply_transaction(RowTransaction::new().remove([parent]));
    assert_eq!(displayed_ids(&model), ["row-group-A", "a"]);
    assert_eq!(displayed_ids(&model), reloaded_ids(tree_model(), vec![child]));
}

#[test]
fn test_tree_data_update_moves_row() {
    init_tracing();
    let rows = vec![
        json!({ "id": "p", "path": ["A"] }),
        json!({ "id": "a", "path": ["A", "B"] }),
        json!({ "id": "c", "path": ["C"] }),
    ];
    let mut model = tree_model();
    model.set_row_data(rows);

    let moved = json!({ "id": "a", "path": ["C", "B"] });
    model.apply_transaction(RowTransaction::new().update([moved.clone()]));
    assert_eq!(displayed_ids(&model), ["p", "c", "a"]);
    assert_eq!(
        displayed_ids(&model),
        reloaded_ids(
            tree_model(),
            vec![json!({ "id": "p", "path": ["A"] }), moved, json!({ "id": "c", "path": ["C"] })]
        )
    );
}

#[test]
fn test_tree_parent_expansion_ignores_row_order() {
    init_tracing();
    let parent = json!({ "id": "p", "path": ["A"] });
    let child = json!({ "id": "a", "path": ["A", "B"] });

    let parent_first = reloaded_ids(tree_model(), vec![parent.clone(), child.clone()]);
    let child_first = reloaded_ids(tree_model(), vec![child, parent]);
    assert_eq!(parent_first, ["p", "a"]);
    assert_eq!(parent_first, child_first);
}

#[test]
fn test_group_transactions_match_full_reload() {
    init_tracing();
    let columns = || {
        vec![
            ColumnDef::new("country").row_group(),
            ColumnDef::new("sport").row_group(),
            ColumnDef::new("gold").agg("sum"),
        ]
    };
    let options = || GridOptions {
        group_default_expanded: -1,
        ..Default::default()
    };
    let mut model = model_with(options(), columns());
    model.set_row_data(vec![
        json!({ "id": "1", "country": "US", "sport": "Swim", "gold": 1 }),
        json!({ "id": "2", "country": "UK", "sport": "Run", "gold": 2 }),
        json!({ "id": "3", "country": "US", "sport": "Run", "gold": 3 }),
    ]);
    model.set_sort_model(vec![SortModelItem::desc("gold")]);

    model.apply_transaction(
        RowTransaction::new()
            .remove([json!({ "id": "2" })])
            .update([json!({ "id": "3", "country": "FR", "sport": "Run", "gold": 3 })])
            .add([json!({ "id": "4", "country": "US", "sport": "Swim", "gold": 9 })]),
    );

    let mut full = model_with(options(), columns());
    full.set_row_data(vec![
        json!({ "id": "1", "country": "US", "sport": "Swim", "gold": 1 }),
        json!({ "id": "3", "country": "FR", "sport": "Run", "gold": 3 }),
        json!({ "id": "4", "country": "US", "sport": "Swim", "gold": 9 }),
    ]);
    full.set_sort_model(vec![SortModelItem::desc("gold")]);

    assert_eq!(displayed_ids(&model), displayed_ids(&full));
    let us = model.row_at(0).unwrap();
    assert_eq!(model.node(us).unwrap().id, "row-group-country-US");
    assert_eq!(model.value(us, "gold"), CellValue::Int(10));
}

#[test]
fn test_sort_with_nan_values() {
    init_tracing();
    let mut model = ClientSideRowModel::<BTreeMap<String, CellValue>>::builder()
        .columns(vec![ColumnDef::new("v")])
        .build()
        .unwrap();
    let rows = (0..200)
        .map(|i| {
            let v = if i % 3 == 0 { f64::NAN } else { f64::from(200 - i) };
            BTreeMap::from([("v".to_string(), CellValue::Float(v))])
        })
        .collect();
    model.set_row_data(rows);
    model.set_sort_model(vec![SortModelItem::asc("v")]);

    let values: Vec<f64> = (0..model.row_count())
        .map(|i| model.value(model.row_at(i).unwrap(), "v").as_f64().unwrap())
        .collect();
    let (numbers, nans) = values.split_at(values.iter().position(|v| v.is_nan()).unwrap());
    assert!(numbers.windows(2).all(|w| w[0] <= w[1]));
    assert!(nans.iter().all(|v| v.is_nan()));
    assert_eq!(nans.len(), 67);
}

#[test]
fn test_model_updated_reports_start_stage() {
    init_tracing();
    let mut model = model_with(GridOptions::default(), vec![ColumnDef::new("v")]);
    let events: Arc<Mutex<Vec<ModelUpdated>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    model.signals().model_updated.connect(move |e| sink.lock().push(*e));

    model.set_row_data(vec![json!({ "id": "1", "v": 1 })]);
    model.set_sort_model(vec![SortModelItem::asc("v")]);

    let stages: Vec<RefreshStage> = events.lock().iter().map(|e| e.stage).collect();
    assert_eq!(stages, [RefreshStage::Everything, RefreshStage::Sort]);
}

#[test]
fn test_options_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.toml");
    std::fs::write(
        &path,
        "groupDefaultExpanded = -1\ngroupIncludeFooter = true\nserverSideBlockSize = 50\n",
    )
    .unwrap();

    let options = GridOptions::from_path(&path).unwrap();
    assert_eq!(options.group_default_expanded, -1);
    assert!(options.group_include_footer);
    assert_eq!(options.server_side_block_size, 50);

    let missing = GridOptions::from_path(dir.path().join("missing.toml"));
    assert!(matches!(missing, Err(GridError::Io { .. })));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn add_then_remove_restores_leaves(initial in 0usize..12, added in 1usize..6) {
        let mut model = model_with(GridOptions::default(), vec![ColumnDef::new("v")]);
        let rows: Vec<Value> = (0..initial).map(|i| json!({ "id": format!("r{i}"), "v": i })).collect();
        model.set_row_data(rows);
        let before = leaf_ids(&model);

        let extra: Vec<Value> = (0..added).map(|i| json!({ "id": format!("n{i}"), "v": i })).collect();
        let result = model.apply_transaction(RowTransaction::new().add(extra.clone()));
        prop_assert!(result.errors.is_empty());
        prop_assert_eq!(leaf_ids(&model).len(), initial + added);

        let result = model.apply_transaction(RowTransaction::new().remove(extra));
        prop_assert!(result.errors.is_empty());
        prop_assert_eq!(leaf_ids(&model), before);
    }

    #[test]
    fn sort_is_stable(values in proptest::collection::vec(0i64..3, 1..30)) {
        let mut model = model_with(GridOptions::default(), vec![ColumnDef::new("v")]);
        let rows: Vec<Value> = values
            .iter()
            .enumerate()
            .map(|(i, v)| json!({ "id": i.to_string(), "v": v }))
            .collect();
        model.set_row_data(rows);
        model.set_sort_model(vec![SortModelItem::asc("v")]);

        let mut expected: Vec<usize> = (0..values.len()).collect();
        expected.sort_by_key(|&i| values[i]);
        let expected: Vec<String> = expected.iter().map(|i| i.to_string()).collect();
        prop_assert_eq!(displayed_ids(&model), expected);
    }
}
