//! Evaluate one formula over whole layers.
//!
//! Formulas refer to input layers as `g1..gN` (on the target grid system) and `h1..hM`
//! (sampled at the cell centre's world position, nearest neighbour), plus the per-cell tokens
//! `col()`, `row()`, `xpos()` and `ypos()`. Before compiling, these tokens are rewritten to
//! plain variable letters and `nodata()` to the configured no-data value. Trailing
//! `; NAME = expression` clauses define named sub-expressions:
//!
//! ```
//! use formula_grid::{CalculatorOptions, GridCalculator, GridSystem, Layer};
//!
//! let system = GridSystem::new(2, 1, 1.0, 0.0, 0.0);
//! let nir = Layer::new(system, vec![0.8, 0.5], -99999.0).unwrap();
//! let red = Layer::new(system, vec![0.2, 0.5], -99999.0).unwrap();
//!
//! let calc = GridCalculator::new(
//!     "ifelse(lt(NDVI, 0.4), nodata(), NDVI); NDVI = (g1 - g2) / (g1 + g2)",
//!     2,
//!     0,
//!     CalculatorOptions::default(),
//! )
//! .unwrap();
//! let result = calc.run(&system, &[nir, red], &[]).unwrap();
//! assert!((result.get(0, 0) - 0.6).abs() < 1e-12);
//! assert!(result.is_no_data(1, 0));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::CompileOptions;
use crate::error::FormulaError;
use crate::functions::FunctionTable;
use crate::{parallel, Formula, VARIABLE_SLOTS};

/// Caller-side tokens understood by [`GridCalculator`], for [`crate::help_operators`].
pub const CALCULATOR_TOKENS: &[(&str, &str)] = &[
    ("g1, g2, ...", "Input layers on the target grid system"),
    ("h1, h2, ...", "Input layers sampled at the cell centre (nearest neighbour)"),
    ("xpos(), ypos()", "The coordinate (x/y) for the center of the currently processed cell"),
    ("col(), row()", "The currently processed cell's column/row index"),
    ("nodata()", "No-data value of the resulting layer"),
];

/// Order in which position tokens take variable slots (first gets the lowest letter).
const POSITION_TOKENS: [&str; 4] = ["col()", "row()", "xpos()", "ypos()"];

/// Argument-less calls written without blanks before they are recognised.
const EMPTY_CALLS: [&str; 5] = ["nodata", "col", "row", "xpos", "ypos"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalculatorError {
    #[error("too many input variables ({needed} needed, at most {max})")]
    TooManyInputs { needed: usize, max: usize },
    #[error("invalid argument for function {name}({argument})")]
    InvalidArgument { name: &'static str, argument: String },
    #[error("{message}")]
    Formula {
        message: String,
        #[source]
        source: FormulaError,
    },
    #[error("expected {expected} input layers, got {actual}")]
    InputCount { expected: usize, actual: usize },
    #[error("input layer {index} does not match the target grid system")]
    SystemMismatch { index: usize },
    #[error("layer has {actual} cells, grid system needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorOptions {
    /// Value written for cells without a finite result.
    pub no_data: f64,
    /// Pass no-data input cells to the formula instead of skipping them.
    pub use_no_data: bool,
    /// Evaluate rows on the worker pool (requires the `parallel` feature).
    pub parallel: bool,
}

impl Default for CalculatorOptions {
    fn default() -> Self {
        Self {
            no_data: -99999.0,
            use_no_data: false,
            parallel: true,
        }
    }
}

/// Shape and georeference of a layer. Coordinates refer to cell centres; `y` grows with the
/// row index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSystem {
    pub nx: usize,
    pub ny: usize,
    pub cellsize: f64,
    pub x_min: f64,
    pub y_min: f64,
}

impl GridSystem {
    pub fn new(nx: usize, ny: usize, cellsize: f64, x_min: f64, y_min: f64) -> Self {
        Self {
            nx,
            ny,
            cellsize,
            x_min,
            y_min,
        }
    }

    #[inline]
    pub fn cells(&self) -> usize {
        self.nx * self.ny
    }

    #[inline]
    pub fn world(&self, x: usize, y: usize) -> (f64, f64) {
        (
            self.x_min + x as f64 * self.cellsize,
            self.y_min + y as f64 * self.cellsize,
        )
    }

    /// Cell whose centre is nearest to a world position, if it lies on the grid.
    pub fn cell_at(&self, wx: f64, wy: f64) -> Option<(usize, usize)> {
        let ix = ((wx - self.x_min) / self.cellsize).round();
        let iy = ((wy - self.y_min) / self.cellsize).round();
        let on_grid = |i: f64, n: usize| i >= 0.0 && i < n as f64;
        (on_grid(ix, self.nx) && on_grid(iy, self.ny)).then(|| (ix as usize, iy as usize))
    }

    fn same_shape(&self, other: &GridSystem) -> bool {
        self.nx == other.nx && self.ny == other.ny
    }
}

/// Row-major cell values on a [`GridSystem`].
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    system: GridSystem,
    values: Vec<f64>,
    no_data: f64,
}

impl Layer {
    pub fn new(system: GridSystem, values: Vec<f64>, no_data: f64) -> Result<Self, CalculatorError> {
        if values.len() != system.cells() {
            return Err(CalculatorError::SizeMismatch {
                expected: system.cells(),
                actual: values.len(),
            });
        }
        Ok(Self {
            system,
            values,
            no_data,
        })
    }

    pub fn filled(system: GridSystem, value: f64, no_data: f64) -> Self {
        Self {
            system,
            values: vec![value; system.cells()],
            no_data,
        }
    }

    pub fn system(&self) -> &GridSystem {
        &self.system
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn no_data(&self) -> f64 {
        self.no_data
    }

    /// Value of cell (`x`, `y`). Panics when the cell is outside the grid.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.system.nx + x]
    }

    #[inline]
    pub fn is_no_data(&self, x: usize, y: usize) -> bool {
        self.is_no_data_value(self.get(x, y))
    }

    #[inline]
    fn is_no_data_value(&self, value: f64) -> bool {
        value.is_nan() || value == self.no_data
    }

    /// Nearest-neighbour sample at a world position.
    pub fn sample(&self, wx: f64, wy: f64) -> Option<f64> {
        self.system.cell_at(wx, wy).map(|(x, y)| self.get(x, y))
    }
}

/// A formula compiled for a fixed number of input layers.
#[derive(Clone, Debug)]
pub struct GridCalculator {
    formula: Formula,
    n_grids: usize,
    n_resampled: usize,
    positions: [bool; 4],
    n_values: usize,
    options: CalculatorOptions,
}

impl GridCalculator {
    pub fn new(
        source: &str,
        n_grids: usize,
        n_resampled: usize,
        options: CalculatorOptions,
    ) -> Result<Self, CalculatorError> {
        Self::with_functions(source, n_grids, n_resampled, options, FunctionTable::with_builtins())
    }

    pub fn with_functions(
        source: &str,
        n_grids: usize,
        n_resampled: usize,
        options: CalculatorOptions,
        functions: FunctionTable,
    ) -> Result<Self, CalculatorError> {
        let mut text = preprocess(source, options.no_data)?;

        let positions = POSITION_TOKENS.map(|token| text.contains(token));
        let n_values = n_grids + n_resampled + positions.iter().filter(|&&p| p).count();
        if n_values > VARIABLE_SLOTS {
            return Err(CalculatorError::TooManyInputs {
                needed: n_values,
                max: VARIABLE_SLOTS,
            });
        }

        // Slots in ascending order: grids, resampled layers, then the used position tokens.
        let tokens: Vec<String> = (1..=n_grids)
            .map(|i| format!("g{i}"))
            .chain((1..=n_resampled).map(|i| format!("h{i}")))
            .chain(
                POSITION_TOKENS
                    .iter()
                    .zip(positions)
                    .filter(|(_, used)| *used)
                    .map(|(token, _)| token.to_string()),
            )
            .collect();
        // Highest slot first so `g12` is rewritten before `g1`.
        for (slot, token) in tokens.iter().enumerate().rev() {
            text = text.replace(token.as_str(), letter(slot));
        }

        let alphabet: String = (0..n_values).map(letter).collect();
        let mut formula =
            Formula::with_functions(functions).with_options(CompileOptions::with_alphabet(alphabet));
        if !formula.set_formula(&text) {
            if let Some(source) = formula.error().cloned() {
                let message = formula.error_message().unwrap_or_default();
                return Err(CalculatorError::Formula { message, source });
            }
        }
        log::debug!("grid calculator formula `{source}` compiled as `{text}`");

        Ok(Self {
            formula,
            n_grids,
            n_resampled,
            positions,
            n_values,
            options,
        })
    }

    /// The compiled formula (after token substitution).
    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn options(&self) -> &CalculatorOptions {
        &self.options
    }

    /// Operator help including the calculator tokens.
    pub fn help(html: bool) -> String {
        crate::help_operators(html, CALCULATOR_TOKENS)
    }

    /// Evaluate every cell of `system`.
    ///
    /// Cells whose inputs are no-data (unless `use_no_data`), whose `h` samples fall off their
    /// layer, or whose result is not finite get the no-data value.
    pub fn run(
        &self,
        system: &GridSystem,
        grids: &[Layer],
        resampled: &[Layer],
    ) -> Result<Layer, CalculatorError> {
        if grids.len() != self.n_grids {
            return Err(CalculatorError::InputCount {
                expected: self.n_grids,
                actual: grids.len(),
            });
        }
        if resampled.len() != self.n_resampled {
            return Err(CalculatorError::InputCount {
                expected: self.n_resampled,
                actual: resampled.len(),
            });
        }
        if let Some(index) = grids.iter().position(|g| !g.system.same_shape(system)) {
            return Err(CalculatorError::SystemMismatch { index });
        }

        let no_data = self.options.no_data;
        let mut cells = vec![no_data; system.cells()];
        parallel::for_each_row(
            &mut cells,
            system.nx,
            self.options.parallel,
            || (self.formula.clone(), vec![0.0; self.n_values]),
            |state: &mut (Formula, Vec<f64>), y, row| {
                let (formula, values) = state;
                for (x, cell) in row.iter_mut().enumerate() {
                    if !self.cell_values(system, grids, resampled, x, y, values) {
                        continue;
                    }
                    let result = formula.value_with(values);
                    if !formula.has_error() && result.is_finite() {
                        *cell = result;
                    }
                }
            },
        );

        Layer::new(*system, cells, no_data)
    }

    fn cell_values(
        &self,
        system: &GridSystem,
        grids: &[Layer],
        resampled: &[Layer],
        x: usize,
        y: usize,
        values: &mut [f64],
    ) -> bool {
        for (slot, grid) in values.iter_mut().zip(grids) {
            let v = grid.get(x, y);
            if !self.options.use_no_data && grid.is_no_data_value(v) {
                return false;
            }
            *slot = v;
        }

        let (wx, wy) = system.world(x, y);
        for (slot, layer) in values[self.n_grids..].iter_mut().zip(resampled) {
            match layer.sample(wx, wy) {
                Some(v) if self.options.use_no_data || !layer.is_no_data_value(v) => *slot = v,
                _ => return false,
            }
        }

        let per_cell = [x as f64, y as f64, wx, wy];
        let mut n = self.n_grids + self.n_resampled;
        for (value, used) in per_cell.into_iter().zip(self.positions) {
            if used {
                values[n] = value;
                n += 1;
            }
        }
        true
    }
}

fn letter(slot: usize) -> &'static str {
    const LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";
    &LETTERS[slot..slot + 1]
}

/// Strip line breaks and tabs, substitute `nodata()` and expand `; NAME = expression` clauses.
pub fn preprocess(source: &str, no_data: f64) -> Result<String, CalculatorError> {
    let mut text = source
        .replace("\\n", "")
        .replace(['\n', '\r', '\t'], "");
    for name in EMPTY_CALLS {
        text = collapse_empty_call(&text, name);
    }

    let value = number_literal(no_data);
    while let Some(start) = text.find("nodata(") {
        let open = start + "nodata".len();
        let Some(close) = text[open..].find(')').map(|i| open + i) else {
            break;
        };
        let argument = text[open + 1..close].trim();
        if !argument.is_empty() {
            return Err(CalculatorError::InvalidArgument {
                name: "nodata",
                argument: argument.to_string(),
            });
        }
        text.replace_range(start..=close, &value);
    }

    if text.find(';').is_some_and(|i| i > 0) {
        let mut clauses = text.split(';');
        let mut formula = clauses.next().unwrap_or_default().to_string();
        for clause in clauses {
            let Some((key, expression)) = clause.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if !key.is_empty() {
                formula = formula.replace(key, &format!("({})", expression.trim()));
            }
        }
        text = formula;
    }

    Ok(text)
}

/// Rewrite `name ( )` to `name()` wherever `name` is not part of a longer identifier.
fn collapse_empty_call(text: &str, name: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find(name) {
        out.push_str(&rest[..i]);
        let after = &rest[i + name.len()..];
        rest = after;
        out.push_str(name);

        let standalone = !out[..out.len() - name.len()]
            .ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_');
        let tail = after
            .trim_start()
            .strip_prefix('(')
            .map(str::trim_start)
            .and_then(|inner| inner.strip_prefix(')'));
        if let (true, Some(tail)) = (standalone, tail) {
            out.push_str("()");
            rest = tail;
        }
    }
    out.push_str(rest);
    out
}

/// `value` as formula source. Non-finite values are spelled as expressions that fold to them.
fn number_literal(value: f64) -> String {
    if value.is_nan() {
        "(0/0)".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "(1/0)" } else { "(-1/0)" }.to_string()
    } else {
        format!("({value})")
    }
}
