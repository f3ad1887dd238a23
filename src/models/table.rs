//! Columnar tables
//!
//! A `DynamicTable` instance with an `id` dataset that defines the row
//! count, a `colnames` attribute listing its columns in order, and one
//! `VectorData` child per column. Columns hold a plain array (rows along the
//! first axis), a ragged array, or row ranges of another table.

use super::error::{ObjectError, ObjectResult};
use super::graph::ObjectGraph;
use super::object::ObjectId;
use super::value::{ArrayData, FieldValue, RaggedArray, RegionRefs, Scalar};
use crate::spec::{TypeKey, core_type};

/// Handle to a table instance of a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnarTable {
    pub id: ObjectId,
}

impl ColumnarTable {
    /// Create a `DynamicTable` with `rows` rows under `parent`
    pub fn create(
        graph: &mut ObjectGraph,
        parent: ObjectId,
        name: &str,
        description: &str,
        rows: usize,
    ) -> ObjectResult<Self> {
        Self::create_typed(graph, &core_type("DynamicTable"), parent, name, description, rows)
    }

    /// Create a table of a `DynamicTable` subtype
    pub fn create_typed(
        graph: &mut ObjectGraph,
        type_key: &TypeKey,
        parent: ObjectId,
        name: &str,
        description: &str,
        rows: usize,
    ) -> ObjectResult<Self> {
        if !graph.catalog().is_a(type_key, &core_type("DynamicTable")) {
            return Err(ObjectError::NotATable(type_key.to_string()));
        }
        let id = graph.create_instance(type_key, name, Some(parent))?;
        graph.set_field(id, "description", Scalar::from(description).into())?;
        graph.set_field(id, "colnames", ArrayData::from_text(Vec::<String>::new()).into())?;
        graph.set_field(id, "id", ArrayData::from_i64((0..rows as i64).collect()).into())?;
        Ok(Self { id })
    }

    /// Wrap an existing instance, checking that it is a table
    pub fn wrap(graph: &ObjectGraph, id: ObjectId) -> ObjectResult<Self> {
        let instance = graph.instance(id)?;
        if !graph
            .catalog()
            .is_a(&instance.type_key, &core_type("DynamicTable"))
        {
            return Err(ObjectError::NotATable(graph.display_path(id)));
        }
        Ok(Self { id })
    }

    /// Rows as defined by the `id` dataset
    pub fn row_count(&self, graph: &ObjectGraph) -> ObjectResult<usize> {
        graph
            .instance(self.id)?
            .field("id")
            .and_then(|v| v.row_count())
            .ok_or_else(|| {
                ObjectError::MalformedTable(format!(
                    "table '{}' has no id dataset",
                    graph.display_path(self.id)
                ))
            })
    }

    fn check_rows(&self, graph: &ObjectGraph, column: &str, rows: usize) -> ObjectResult<()> {
        let expected = self.row_count(graph)?;
        if rows != expected {
            return Err(ObjectError::RowCountMismatch {
                table: graph.display_path(self.id),
                column: column.to_string(),
                expected,
                actual: rows,
            });
        }
        Ok(())
    }

    fn new_column(
        &self,
        graph: &mut ObjectGraph,
        type_name: &str,
        name: &str,
        description: &str,
        data: FieldValue,
    ) -> ObjectResult<ObjectId> {
        let column = graph.create_instance(&core_type(type_name), name, Some(self.id))?;
        let filled = graph
            .set_field(column, "description", Scalar::from(description).into())
            .and_then(|_| graph.set_data(column, data));
        if let Err(e) = filled {
            graph.discard(column)?;
            return Err(e);
        }
        self.push_colname(graph, name)?;
        Ok(column)
    }

    /// Add a column with one array row per table row
    pub fn add_column(
        &self,
        graph: &mut ObjectGraph,
        name: &str,
        description: &str,
        data: ArrayData,
    ) -> ObjectResult<ObjectId> {
        self.check_rows(graph, name, data.rows())?;
        self.new_column(graph, "VectorData", name, description, FieldValue::Array(data))
    }

    /// Add a column whose rows have variable length
    pub fn add_ragged_column(
        &self,
        graph: &mut ObjectGraph,
        name: &str,
        description: &str,
        data: RaggedArray,
    ) -> ObjectResult<ObjectId> {
        data.check()?;
        self.check_rows(graph, name, data.len())?;
        self.new_column(graph, "VectorData", name, description, FieldValue::Ragged(data))
    }

    /// Add a column of row ranges into another table
    pub fn add_region_column(
        &self,
        graph: &mut ObjectGraph,
        name: &str,
        description: &str,
        region: RegionRefs,
    ) -> ObjectResult<ObjectId> {
        self.check_rows(graph, name, region.len())?;
        let target_rows = ColumnarTable::wrap(graph, region.table)?.row_count(graph)?;
        if let Some((start, end)) = region.first_out_of_bounds(target_rows) {
            return Err(ObjectError::MalformedTable(format!(
                "region {}..{} outside '{}' with {} rows",
                start,
                end,
                graph.display_path(region.table),
                target_rows
            )));
        }
        self.new_column(
            graph,
            "DynamicTableRegion",
            name,
            description,
            FieldValue::Region(region),
        )
    }

    /// Set a ragged column declared as a field of the table type (such as
    /// `spike_times` of `Units`)
    pub fn set_indexed_field(
        &self,
        graph: &mut ObjectGraph,
        name: &str,
        data: RaggedArray,
    ) -> ObjectResult<()> {
        data.check()?;
        self.check_rows(graph, name, data.len())?;
        graph.set_field(self.id, name, FieldValue::Ragged(data))?;
        self.push_colname(graph, name)
    }

    fn push_colname(&self, graph: &mut ObjectGraph, name: &str) -> ObjectResult<()> {
        let mut names = self.column_names(graph);
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            graph.clear_field(self.id, "colnames")?;
            graph.set_field(self.id, "colnames", ArrayData::from_text(names).into())?;
        }
        Ok(())
    }

    /// Column names in insertion order
    pub fn column_names(&self, graph: &ObjectGraph) -> Vec<String> {
        graph
            .get(self.id)
            .and_then(|i| i.field("colnames"))
            .and_then(|v| v.as_array())
            .and_then(|a| a.as_text())
            .map(|names| names.to_vec())
            .unwrap_or_default()
    }

    /// Column instance by name
    pub fn column(&self, graph: &ObjectGraph, name: &str) -> ObjectResult<ObjectId> {
        graph
            .children(self.id)
            .into_iter()
            .find(|c| {
                graph.get(*c).is_some_and(|i| {
                    i.name == name && graph.catalog().is_a(&i.type_key, &core_type("VectorData"))
                })
            })
            .ok_or_else(|| {
                ObjectError::UnknownPath(format!("{}/{}", graph.display_path(self.id), name))
            })
    }

    /// One row of a ragged column, either a column child or an indexed field
    pub fn ragged_row(
        &self,
        graph: &ObjectGraph,
        column: &str,
        row: usize,
    ) -> ObjectResult<ArrayData> {
        let table = graph.instance(self.id)?;
        let value = match table.field(column) {
            Some(value @ FieldValue::Ragged(_)) => value,
            _ => {
                let column_id = self.column(graph, column)?;
                graph
                    .instance(column_id)?
                    .data
                    .as_ref()
                    .ok_or_else(|| {
                        ObjectError::MalformedTable(format!("column '{}' has no data", column))
                    })?
            }
        };
        match value {
            FieldValue::Ragged(ragged) => ragged.row(row),
            other => Err(ObjectError::MalformedTable(format!(
                "column '{}' holds a {}, not a ragged array",
                column,
                other.describe()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::core_catalog;
    use std::sync::Arc;

    fn graph() -> ObjectGraph {
        ObjectGraph::new(Arc::new(core_catalog()), &core_type("NWBFile")).unwrap()
    }

    #[test]
    fn test_events_table() {
        let mut g = graph();
        let root = g.root();
        let table = ColumnarTable::create(&mut g, root, "events", "task events", 3).unwrap();
        let times = RaggedArray::from_f64_rows(vec![
            vec![0.1, 0.2],
            vec![],
            vec![1.0, 1.5, 2.0],
        ])
        .unwrap();
        assert_eq!(times.offsets, vec![2, 2, 5]);
        table.add_ragged_column(&mut g, "times", "event times", times).unwrap();
        table
            .add_column(&mut g, "label", "event label", ArrayData::from_text(["a", "b", "c"]))
            .unwrap();

        assert_eq!(table.row_count(&g).unwrap(), 3);
        assert_eq!(table.column_names(&g), vec!["times", "label"]);
        assert!(table.ragged_row(&g, "times", 1).unwrap().is_empty());
        assert_eq!(table.ragged_row(&g, "times", 2).unwrap().len(), 3);
        assert_eq!(g.resolve_path("/events/times").unwrap(), table.column(&g, "times").unwrap());
    }

    #[test]
    fn test_row_count_mismatch() {
        let mut g = graph();
        let root = g.root();
        let table = ColumnarTable::create(&mut g, root, "trials", "trials", 2).unwrap();
        assert!(matches!(
            table.add_column(&mut g, "start", "start", ArrayData::from_f64(vec![1.0])),
            Err(ObjectError::RowCountMismatch { expected: 2, actual: 1, .. })
        ));
        assert!(table.column_names(&g).is_empty());
    }

    #[test]
    fn test_malformed_ragged_rejected() {
        let mut g = graph();
        let root = g.root();
        let table = ColumnarTable::create(&mut g, root, "events", "events", 3).unwrap();
        let bad = RaggedArray {
            data: ArrayData::from_f64(vec![0.0; 5]),
            offsets: vec![2, 1, 5],
        };
        assert!(matches!(
            table.add_ragged_column(&mut g, "times", "times", bad),
            Err(ObjectError::MalformedTable(_))
        ));
    }

    #[test]
    fn test_region_column_bounds() {
        let mut g = graph();
        let root = g.root();
        let electrodes = ColumnarTable::create(&mut g, root, "electrodes", "electrodes", 4).unwrap();
        let units = ColumnarTable::create_typed(
            &mut g,
            &core_type("Units"),
            root,
            "units",
            "sorted units",
            2,
        )
        .unwrap();
        units
            .add_region_column(
                &mut g,
                "electrodes",
                "electrodes per unit",
                RegionRefs::new(electrodes.id, vec![(0, 2), (2, 4)]),
            )
            .unwrap();
        assert!(matches!(
            units.add_region_column(
                &mut g,
                "bad",
                "out of range",
                RegionRefs::new(electrodes.id, vec![(0, 2), (3, 5)]),
            ),
            Err(ObjectError::MalformedTable(_))
        ));

        units
            .set_indexed_field(
                &mut g,
                "spike_times",
                RaggedArray::from_f64_rows(vec![vec![0.5], vec![0.7, 0.9]]).unwrap(),
            )
            .unwrap();
        assert_eq!(units.ragged_row(&g, "spike_times", 1).unwrap().len(), 2);
        assert_eq!(units.column_names(&g), vec!["electrodes", "spike_times"]);
    }
}
