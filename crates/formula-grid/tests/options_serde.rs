use formula_grid::{CalculatorOptions, CompileOptions, FunctionInfo, FunctionTable, GridSystem};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn compile_options_fill_missing_fields_with_defaults() {
    let options: CompileOptions = serde_json::from_value(json!({ "alphabet": "xyz" })).unwrap();
    assert_eq!(options, CompileOptions::with_alphabet("xyz"));
    assert_eq!(options.max_constants, 255);

    let options: CompileOptions = serde_json::from_value(json!({})).unwrap();
    assert_eq!(options, CompileOptions::default());
}

#[test]
fn calculator_options_round_trip() {
    let options = CalculatorOptions {
        no_data: -9999.0,
        use_no_data: true,
        parallel: false,
    };
    let value = serde_json::to_value(&options).unwrap();
    assert_eq!(
        value,
        json!({ "no_data": -9999.0, "use_no_data": true, "parallel": false })
    );
    let back: CalculatorOptions = serde_json::from_value(value).unwrap();
    assert_eq!(back, options);
}

#[test]
fn grid_system_serializes_as_plain_fields() {
    let system = GridSystem::new(10, 20, 30.0, 1000.0, 2000.0);
    assert_eq!(
        serde_json::to_value(system).unwrap(),
        json!({ "nx": 10, "ny": 20, "cellsize": 30.0, "x_min": 1000.0, "y_min": 2000.0 })
    );
}

#[test]
fn function_descriptions_serialize() {
    let table = FunctionTable::with_builtins();
    let info = table.describe(table.lookup("atan2").unwrap()).unwrap();
    assert_eq!(
        serde_json::to_value(&info).unwrap(),
        json!({ "name": "atan2", "arity": 2, "varying": false })
    );
    let all: Vec<FunctionInfo> = (0..table.len())
        .map(|i| table.describe(i).unwrap())
        .collect();
    assert_eq!(all.iter().filter(|f| f.varying).count(), 2);
}
