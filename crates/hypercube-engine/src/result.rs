//! Query result shape: axes of tuple positions and the cell grid they span.

use hypercube_model::Tuple;

use crate::value::{is_double_null, Value};

/// One point on an axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    tuple: Tuple,
}

impl Position {
    pub fn new(tuple: Tuple) -> Self {
        Position { tuple }
    }

    pub fn tuple(&self) -> &Tuple {
        &self.tuple
    }
}

/// An ordered axis of positions (columns, rows, ...).
#[derive(Debug, Clone, Default)]
pub struct Axis {
    positions: Vec<Position>,
}

impl Axis {
    pub fn new(positions: Vec<Position>) -> Self {
        Axis { positions }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// One evaluated cell: the raw value plus the measure's display pattern.
#[derive(Debug, Clone)]
pub struct Cell {
    value: Value,
    format: Option<String>,
}

impl Cell {
    pub fn new(value: Value, format: Option<String>) -> Self {
        Cell { value, format }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_null(&self) -> bool {
        match &self.value {
            Value::Null => true,
            Value::Double(d) => is_double_null(*d),
            _ => false,
        }
    }

    /// The value rendered through the display pattern; nulls render empty.
    pub fn formatted_value(&self) -> String {
        if self.is_null() {
            return String::new();
        }
        match (&self.value, &self.format) {
            (Value::Double(d), Some(pattern)) => format_number(*d, pattern),
            (Value::Int(i), Some(pattern)) => format_number(*i as f64, pattern),
            (v, _) => v.to_string(),
        }
    }
}

/// Renders `value` through a `#,##0.00`-style pattern: the characters after
/// the decimal point fix the fraction digit count, a `,` anywhere enables
/// thousands grouping.
fn format_number(value: f64, pattern: &str) -> String {
    let decimals = pattern
        .rsplit_once('.')
        .map(|(_, frac)| frac.chars().filter(|c| *c == '0' || *c == '#').count())
        .unwrap_or(0);
    let grouped = pattern.contains(',');

    let rendered = format!("{value:.decimals$}");
    if !grouped {
        return rendered;
    }
    let (sign, rest) = rendered
        .strip_prefix('-')
        .map_or(("", rendered.as_str()), |r| ("-", r));
    let (int_part, frac_part) = rest
        .split_once('.')
        .map_or((rest, None), |(i, f)| (i, Some(f)));

    let mut out = String::with_capacity(rendered.len() + int_part.len() / 3 + 1);
    out.push_str(sign);
    let offset = int_part.len() % 3;
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && i % 3 == offset {
            out.push(',');
        }
        out.push(ch);
    }
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// The evaluated result grid: axes plus one cell per coordinate
/// combination, stored with the first axis fastest.
#[derive(Debug, Clone)]
pub struct CellSet {
    axes: Vec<Axis>,
    cells: Vec<Cell>,
}

impl CellSet {
    pub fn new(axes: Vec<Axis>, cells: Vec<Cell>) -> Self {
        let expected: usize = axes.iter().map(Axis::len).product();
        assert_eq!(
            cells.len(),
            expected,
            "cell count does not cover the axis cross product"
        );
        CellSet { axes, cells }
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// The cell at one coordinate per axis.
    pub fn cell(&self, coordinates: &[usize]) -> &Cell {
        assert_eq!(
            coordinates.len(),
            self.axes.len(),
            "one coordinate per axis"
        );
        let mut ordinal = 0;
        let mut stride = 1;
        for (axis, &coord) in self.axes.iter().zip(coordinates) {
            assert!(
                coord < axis.len(),
                "coordinate {coord} out of range for an axis of {} positions",
                axis.len()
            );
            ordinal += coord * stride;
            stride *= axis.len();
        }
        &self.cells[ordinal]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DOUBLE_NULL;
    use pretty_assertions::assert_eq;

    #[test]
    fn pattern_fixes_decimals_and_grouping() {
        assert_eq!(format_number(1234567.891, "#,##0.00"), "1,234,567.89");
        assert_eq!(format_number(1234.6, "0"), "1235");
        assert_eq!(format_number(-1234.5, "#,##0.0"), "-1,234.5");
        assert_eq!(format_number(12.0, "#,##0"), "12");
    }

    #[test]
    fn null_cells_render_empty() {
        let cell = Cell::new(Value::Double(DOUBLE_NULL), Some("#,##0.00".to_string()));
        assert!(cell.is_null());
        assert_eq!(cell.formatted_value(), "");
    }

    #[test]
    fn unformatted_cells_render_the_raw_value() {
        let cell = Cell::new(Value::Double(2.5), None);
        assert_eq!(cell.formatted_value(), "2.5");
    }

    #[test]
    fn cell_lookup_walks_the_first_axis_fastest() {
        use hypercube_model::Catalog;
        let mut b = Catalog::builder();
        let gd = b.add_dimension("Gender").unwrap();
        let gender = b.add_hierarchy(&gd, "Gender").unwrap();
        let gl = b.add_level(&gender, "Gender", 1).unwrap();
        let m = b.add_member(&gl, "M", None).unwrap();
        let f = b.add_member(&gl, "F", None).unwrap();
        let td = b.add_dimension("Time").unwrap();
        let time = b.add_hierarchy(&td, "Time").unwrap();
        let tl = b.add_level(&time, "Year", 1).unwrap();
        let y7 = b.add_member(&tl, "1997", None).unwrap();
        let y8 = b.add_member(&tl, "1998", None).unwrap();
        let _ = b.build();

        let columns = Axis::new(vec![
            Position::new(Tuple::from_members([m])),
            Position::new(Tuple::from_members([f])),
        ]);
        let rows = Axis::new(vec![
            Position::new(Tuple::from_members([y7])),
            Position::new(Tuple::from_members([y8])),
        ]);
        let cells = (0..4)
            .map(|i| Cell::new(Value::Double(i as f64), None))
            .collect();
        let set = CellSet::new(vec![columns, rows], cells);

        assert_eq!(set.cell(&[0, 0]).value(), &Value::Double(0.0));
        assert_eq!(set.cell(&[1, 0]).value(), &Value::Double(1.0));
        assert_eq!(set.cell(&[0, 1]).value(), &Value::Double(2.0));
        assert_eq!(set.cell(&[1, 1]).value(), &Value::Double(3.0));
    }
}
