//! Context-sensitive member access and measure reads.

use std::collections::BTreeMap;
use std::sync::Arc;

use hypercube_model::{CellRequest, ColumnId, Hierarchy, Measure, Member, Tuple};

use super::{any_depends, Calc, DoubleCalc, MemberCalc, TupleCalc};
use crate::context::EvalContext;
use crate::error::EngineResult;
use crate::value::{Value, DOUBLE_NULL};

/// `<Hierarchy>.CurrentMember`: reads the context's current member for one
/// hierarchy. Depends on exactly that hierarchy.
pub struct CurrentMemberCalc {
    hierarchy: Hierarchy,
}

impl CurrentMemberCalc {
    pub fn new(hierarchy: Hierarchy) -> Self {
        CurrentMemberCalc { hierarchy }
    }
}

impl Calc for CurrentMemberCalc {
    fn name(&self) -> &str {
        "CurrentMember"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_member(self.evaluate_member(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        *hierarchy == self.hierarchy
    }

    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        args.insert("style".to_string(), self.result_style().to_string());
        args.insert("hierarchy".to_string(), self.hierarchy.to_string());
    }
}

impl MemberCalc for CurrentMemberCalc {
    fn evaluate_member(&self, ctx: &mut EvalContext) -> EngineResult<Member> {
        Ok(ctx.current_member(&self.hierarchy))
    }
}

/// A measure read: assembles a cell request from the current members of the
/// mapped hierarchies and resolves it through the context's cell reader.
///
/// Null current members contribute no coordinate (the request stays coarse
/// on that column); "no row" from the reader is the double null.
pub struct MeasureCalc {
    measure: Measure,
    columns: Vec<(Hierarchy, ColumnId)>,
}

impl MeasureCalc {
    pub fn new(measure: Measure, columns: Vec<(Hierarchy, ColumnId)>) -> Self {
        MeasureCalc { measure, columns }
    }

    pub fn measure(&self) -> &Measure {
        &self.measure
    }
}

impl Calc for MeasureCalc {
    fn name(&self) -> &str {
        "Measure"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_double(self.evaluate_double(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        // The request changes whenever a mapped hierarchy's current member
        // changes.
        self.columns.iter().any(|(h, _)| h == hierarchy)
    }

    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        args.insert("style".to_string(), self.result_style().to_string());
        args.insert("measure".to_string(), self.measure.name.clone());
    }
}

impl DoubleCalc for MeasureCalc {
    fn evaluate_double(&self, ctx: &mut EvalContext) -> EngineResult<f64> {
        let mut coordinates = Vec::with_capacity(self.columns.len());
        for (hierarchy, column) in &self.columns {
            let member = ctx.current_member(hierarchy);
            if !member.is_null() {
                coordinates.push((*column, member.name().to_string()));
            }
        }
        let request = CellRequest::new(self.measure.id, coordinates);
        let reader = ctx.reader().clone();
        Ok(match reader.cell_value(&request)? {
            Some(v) => v,
            None => DOUBLE_NULL,
        })
    }
}

/// Tuple constructor over member-valued children. Any null member makes the
/// whole tuple the tuple-level null.
pub struct TupleConstructorCalc {
    children: Vec<Arc<dyn MemberCalc>>,
}

impl TupleConstructorCalc {
    pub fn new(children: Vec<Arc<dyn MemberCalc>>) -> Self {
        assert!(!children.is_empty(), "tuples have at least one position");
        TupleConstructorCalc { children }
    }

    pub fn arity(&self) -> usize {
        self.children.len()
    }
}

impl Calc for TupleConstructorCalc {
    fn name(&self) -> &str {
        "Tuple"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_tuple(self.evaluate_tuple(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        any_depends(&self.children(), hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        self.children.iter().map(|c| c.as_ref() as &dyn Calc).collect()
    }
}

impl TupleCalc for TupleConstructorCalc {
    fn evaluate_tuple(&self, ctx: &mut EvalContext) -> EngineResult<Option<Tuple>> {
        let mut members = Vec::with_capacity(self.children.len());
        for child in &self.children {
            let member = child.evaluate_member(ctx)?;
            if member.is_null() {
                return Ok(None);
            }
            members.push(member);
        }
        Ok(Tuple::new(members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CellReader, ExecutionState};
    use hypercube_model::Catalog;

    struct NoData;
    impl CellReader for NoData {
        fn cell_value(&self, _request: &CellRequest) -> EngineResult<Option<f64>> {
            Ok(None)
        }
    }

    fn ctx() -> EvalContext {
        EvalContext::new(Arc::new(NoData), ExecutionState::new())
    }

    fn catalog() -> Catalog {
        let mut b = Catalog::builder();
        let dim = b.add_dimension("Gender").unwrap();
        let hier = b.add_hierarchy(&dim, "Gender").unwrap();
        let level = b.add_level(&hier, "Gender", 1).unwrap();
        b.add_member(&level, "M", None).unwrap();
        let time_dim = b.add_dimension("Time").unwrap();
        let time = b.add_hierarchy(&time_dim, "Time").unwrap();
        let year = b.add_level(&time, "Year", 1).unwrap();
        b.add_member(&year, "1997", None).unwrap();
        b.build()
    }

    #[test]
    fn current_member_depends_only_on_its_hierarchy() {
        let catalog = catalog();
        let gender = catalog.hierarchy_by_name("Gender").unwrap();
        let time = catalog.hierarchy_by_name("Time").unwrap();
        let calc = CurrentMemberCalc::new(gender.clone());
        assert!(calc.depends_on(gender));
        assert!(!calc.depends_on(time));
    }

    #[test]
    fn current_member_defaults_to_null_member() {
        let catalog = catalog();
        let gender = catalog.hierarchy_by_name("Gender").unwrap();
        let calc = CurrentMemberCalc::new(gender.clone());
        let mut c = ctx();
        assert!(calc.evaluate_member(&mut c).unwrap().is_null());
        // Boxed through the generic entry point, the null member is Null.
        assert_eq!(calc.evaluate(&mut c).unwrap(), Value::Null);
    }

    #[test]
    fn tuple_constructor_yields_tuple_null_on_null_position() {
        let catalog = catalog();
        let gender = catalog.hierarchy_by_name("Gender").unwrap();
        let calc = TupleConstructorCalc::new(vec![
            Arc::new(CurrentMemberCalc::new(gender.clone())) as Arc<dyn MemberCalc>,
        ]);
        let mut c = ctx();
        // Unset context: current member is the null member.
        assert_eq!(calc.evaluate_tuple(&mut c).unwrap(), None);
        let m = catalog.hierarchy_members(gender)[0].clone();
        c.set_member(m.clone());
        let tuple = calc.evaluate_tuple(&mut c).unwrap().unwrap();
        assert_eq!(tuple.member(0), &m);
    }
}
