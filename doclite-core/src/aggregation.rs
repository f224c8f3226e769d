// src/aggregation.rs
// Aggregation pipeline: stages consume and produce one in-memory document
// array, in the order supplied. Not streaming, no pushdown beyond stage order.

use ahash::AHashMap;
use serde_json::{Map, Value};

use crate::error::{DocLiteError, Result};
use crate::find_options::compare_values;
use crate::query::matches_query;

/// Aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Group(GroupStage),
    Sort(SortStage),
    Project(ProjectStage),
    Limit(usize),
    Skip(usize),
    Unwind(UnwindStage),
    AddFields(AddFieldsStage),
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    query: Value,
}

/// $group stage - group documents and compute accumulators
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: GroupId,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum GroupId {
    /// A literal key (including null: every document in one group).
    Literal(Value),
    /// "$field" reference.
    Field(String),
    /// Composite object of "$field" references.
    Composite(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(SumExpression),
    Avg(String),
}

#[derive(Debug, Clone)]
pub enum SumExpression {
    Constant(i64),   // {"$sum": 1}
    Field(String),   // {"$sum": "$amount"}
}

/// $sort stage - single key, numeric order flag
#[derive(Debug, Clone)]
pub struct SortStage {
    field: String,
    direction: i32,
}

/// $project stage - inclusion-only reshape
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<String>,
}

/// $unwind stage - fan out one document per array element
#[derive(Debug, Clone)]
pub struct UnwindStage {
    field: String,
}

/// $addFields stage - shallow-merge a literal object into every document
#[derive(Debug, Clone)]
pub struct AddFieldsStage {
    fields: Map<String, Value>,
}

impl Pipeline {
    /// Parse a pipeline from a JSON array of stages.
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let Some(stages_array) = pipeline_json.as_array() else {
            return Err(DocLiteError::AggregationError(
                "pipeline must be an array".to_string(),
            ));
        };

        if stages_array.is_empty() {
            return Err(DocLiteError::AggregationError(
                "pipeline cannot be empty".to_string(),
            ));
        }

        let mut stages = Vec::with_capacity(stages_array.len());
        for stage_json in stages_array {
            stages.push(Stage::from_json(stage_json)?);
        }

        Ok(Pipeline { stages })
    }

    /// Execute the pipeline over a materialized document set.
    pub fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        for stage in &self.stages {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

impl Stage {
    fn from_json(stage_json: &Value) -> Result<Self> {
        let Some(obj) = stage_json.as_object() else {
            return Err(DocLiteError::AggregationError(
                "stage must be an object".to_string(),
            ));
        };

        if obj.len() != 1 {
            return Err(DocLiteError::AggregationError(
                "each stage must have exactly one operator".to_string(),
            ));
        }

        let (stage_name, spec) = obj.iter().next().ok_or_else(|| {
            DocLiteError::AggregationError("stage must have an operator".to_string())
        })?;

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_json(spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(spec)?)),
            "$limit" => Ok(Stage::Limit(parse_count("$limit", spec)?)),
            "$skip" => Ok(Stage::Skip(parse_count("$skip", spec)?)),
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(spec)?)),
            "$addFields" => Ok(Stage::AddFields(AddFieldsStage::from_json(spec)?)),
            _ => Err(DocLiteError::AggregationError(format!(
                "unknown pipeline stage: {}",
                stage_name
            ))),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Limit(limit) => Ok(docs.into_iter().take(*limit).collect()),
            Stage::Skip(skip) => Ok(docs.into_iter().skip(*skip).collect()),
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::AddFields(stage) => stage.execute(docs),
        }
    }
}

fn parse_count(stage: &str, spec: &Value) -> Result<usize> {
    spec.as_u64().map(|n| n as usize).ok_or_else(|| {
        DocLiteError::AggregationError(format!("{} must be a non-negative number", stage))
    })
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if !spec.is_object() {
            return Err(DocLiteError::AggregationError(
                "$match must be an object".to_string(),
            ));
        }
        Ok(MatchStage { query: spec.clone() })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for doc in docs {
            if matches_query(&doc, &self.query)? {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Some(obj) = spec.as_object() else {
            return Err(DocLiteError::AggregationError(
                "$group must be an object".to_string(),
            ));
        };

        let id_value = obj.get("_id").ok_or_else(|| {
            DocLiteError::AggregationError("$group must have an _id field".to_string())
        })?;

        let id = match id_value {
            Value::String(s) if s.starts_with('$') => {
                GroupId::Field(s.trim_start_matches('$').to_string())
            }
            Value::Object(map) => {
                let mut refs = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let Some(field_ref) = value.as_str().filter(|s| s.starts_with('$')) else {
                        return Err(DocLiteError::AggregationError(
                            "composite $group _id values must be $field references".to_string(),
                        ));
                    };
                    refs.push((key.clone(), field_ref.trim_start_matches('$').to_string()));
                }
                GroupId::Composite(refs)
            }
            other => GroupId::Literal(other.clone()),
        };

        let mut accumulators = Vec::new();
        for (field, value) in obj {
            if field == "_id" {
                continue;
            }
            accumulators.push((field.clone(), Accumulator::from_json(value)?));
        }

        Ok(GroupStage { id, accumulators })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        // Running sum/count per group and accumulator; division happens at
        // the end for $avg.
        struct AccState {
            sum_int: i64,
            sum_float: f64,
            has_float: bool,
            count: u64,
        }
        struct GroupState {
            id: Value,
            accumulators: Vec<AccState>,
        }

        let mut groups: AHashMap<String, GroupState> = AHashMap::new();
        let mut order: Vec<String> = Vec::new();

        for doc in docs {
            let id = self.group_id_value(&doc);
            let key = serde_json::to_string(&id)?;

            let state = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                GroupState {
                    id,
                    accumulators: self
                        .accumulators
                        .iter()
                        .map(|_| AccState {
                            sum_int: 0,
                            sum_float: 0.0,
                            has_float: false,
                            count: 0,
                        })
                        .collect(),
                }
            });

            for ((_, accumulator), acc) in self.accumulators.iter().zip(&mut state.accumulators) {
                match accumulator {
                    Accumulator::Sum(SumExpression::Constant(n)) => {
                        acc.sum_int += n;
                        acc.count += 1;
                    }
                    Accumulator::Sum(SumExpression::Field(field))
                    | Accumulator::Avg(field) => {
                        if let Some(value) = doc.get(field) {
                            if let Some(i) = value.as_i64() {
                                acc.sum_int += i;
                                acc.count += 1;
                            } else if let Some(f) = value.as_f64() {
                                acc.sum_float += f;
                                acc.has_float = true;
                                acc.count += 1;
                            }
                        }
                    }
                }
            }
        }

        let mut results = Vec::with_capacity(order.len());
        for key in order {
            let Some(state) = groups.remove(&key) else {
                continue;
            };

            let mut result = Map::new();
            result.insert("_id".to_string(), state.id);

            for ((name, accumulator), acc) in self.accumulators.iter().zip(&state.accumulators) {
                let value = match accumulator {
                    Accumulator::Sum(_) => {
                        if acc.has_float {
                            Value::from(acc.sum_float + acc.sum_int as f64)
                        } else {
                            Value::from(acc.sum_int)
                        }
                    }
                    Accumulator::Avg(_) => {
                        if acc.count == 0 {
                            Value::Null
                        } else {
                            let total = acc.sum_float + acc.sum_int as f64;
                            Value::from(total / acc.count as f64)
                        }
                    }
                };
                result.insert(name.clone(), value);
            }

            results.push(Value::Object(result));
        }

        Ok(results)
    }

    fn group_id_value(&self, doc: &Value) -> Value {
        match &self.id {
            GroupId::Literal(value) => value.clone(),
            GroupId::Field(field) => doc.get(field).cloned().unwrap_or(Value::Null),
            GroupId::Composite(refs) => {
                let mut map = Map::new();
                for (key, field) in refs {
                    map.insert(key.clone(), doc.get(field).cloned().unwrap_or(Value::Null));
                }
                Value::Object(map)
            }
        }
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        let Some(obj) = spec.as_object() else {
            return Err(DocLiteError::AggregationError(
                "accumulator must be an object".to_string(),
            ));
        };

        if obj.len() != 1 {
            return Err(DocLiteError::AggregationError(
                "accumulator must have exactly one operator".to_string(),
            ));
        }

        let (op, value) = obj.iter().next().ok_or_else(|| {
            DocLiteError::AggregationError("accumulator must have an operator".to_string())
        })?;

        match op.as_str() {
            "$sum" => {
                if let Some(n) = value.as_i64() {
                    Ok(Accumulator::Sum(SumExpression::Constant(n)))
                } else if let Some(s) = value.as_str() {
                    if s.starts_with('$') {
                        Ok(Accumulator::Sum(SumExpression::Field(
                            s.trim_start_matches('$').to_string(),
                        )))
                    } else {
                        Err(DocLiteError::AggregationError(
                            "$sum field reference must start with $".to_string(),
                        ))
                    }
                } else {
                    Err(DocLiteError::AggregationError(
                        "$sum must be a number or field reference".to_string(),
                    ))
                }
            }
            "$avg" => {
                if let Some(s) = value.as_str().filter(|s| s.starts_with('$')) {
                    Ok(Accumulator::Avg(s.trim_start_matches('$').to_string()))
                } else {
                    Err(DocLiteError::AggregationError(
                        "$avg must be a field reference".to_string(),
                    ))
                }
            }
            _ => Err(DocLiteError::AggregationError(format!(
                "unknown accumulator: {}",
                op
            ))),
        }
    }
}

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Some(obj) = spec.as_object() else {
            return Err(DocLiteError::AggregationError(
                "$sort must be an object".to_string(),
            ));
        };

        if obj.len() != 1 {
            return Err(DocLiteError::AggregationError(
                "$sort takes a single field".to_string(),
            ));
        }

        let (field, value) = obj.iter().next().ok_or_else(|| {
            DocLiteError::AggregationError("$sort takes a single field".to_string())
        })?;

        let direction = match value.as_i64() {
            Some(1) => 1,
            Some(-1) => -1,
            _ => {
                return Err(DocLiteError::AggregationError(
                    "sort direction must be 1 or -1".to_string(),
                ))
            }
        };

        Ok(SortStage {
            field: field.clone(),
            direction,
        })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.sort_by(|a, b| {
            let cmp = compare_values(a.get(&self.field), b.get(&self.field));
            if self.direction < 0 {
                cmp.reverse()
            } else {
                cmp
            }
        });
        Ok(docs)
    }
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Some(obj) = spec.as_object() else {
            return Err(DocLiteError::AggregationError(
                "$project must be an object".to_string(),
            ));
        };

        let mut fields = Vec::with_capacity(obj.len());
        for (field, value) in obj {
            if value.as_i64() != Some(1) {
                return Err(DocLiteError::AggregationError(
                    "$project supports inclusion (1) only".to_string(),
                ));
            }
            fields.push(field.clone());
        }

        Ok(ProjectStage { fields })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut projected = Map::new();
            if let Some(obj) = doc.as_object() {
                for field in &self.fields {
                    if let Some(value) = obj.get(field) {
                        projected.insert(field.clone(), value.clone());
                    }
                }
            }
            results.push(Value::Object(projected));
        }
        Ok(results)
    }
}

impl UnwindStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Some(field) = spec.as_str().filter(|s| s.starts_with('$')) else {
            return Err(DocLiteError::AggregationError(
                "$unwind takes a $field reference".to_string(),
            ));
        };
        Ok(UnwindStage {
            field: field.trim_start_matches('$').to_string(),
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for doc in docs {
            let elements = match doc.get(&self.field) {
                Some(Value::Array(elements)) => Some(elements.clone()),
                // Non-array (or absent) fields pass through unchanged.
                _ => None,
            };

            match elements {
                Some(elements) => {
                    for element in elements {
                        let mut fanned = doc.clone();
                        if let Some(obj) = fanned.as_object_mut() {
                            obj.insert(self.field.clone(), element);
                        }
                        results.push(fanned);
                    }
                }
                None => results.push(doc),
            }
        }
        Ok(results)
    }
}

impl AddFieldsStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let Some(obj) = spec.as_object() else {
            return Err(DocLiteError::AggregationError(
                "$addFields must be an object".to_string(),
            ));
        };
        Ok(AddFieldsStage {
            fields: obj.clone(),
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());
        for mut doc in docs {
            if let Some(obj) = doc.as_object_mut() {
                for (key, value) in &self.fields {
                    obj.insert(key.clone(), value.clone());
                }
            }
            results.push(doc);
        }
        Ok(results)
    }
}
