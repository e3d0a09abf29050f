use columnar_materialize::native::RowSelection;
use columnar_materialize::{
    load_native, BlockWriter, ByteSlice, ColumnSchema, EncodingKind, LoaderOptions, LogicalType,
    NativeColumn, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn cells(column: &NativeColumn) -> Vec<Option<Value>> {
    (0..column.len()).map(|row| column.get(row)).collect()
}

#[test]
fn boolean_rows_keep_nulls() -> Result<(), Box<dyn std::error::Error>> {
    let values = vec![
        Some(Value::Boolean(true)),
        Some(Value::Boolean(false)),
        None,
        None,
        None,
        Some(Value::Boolean(true)),
    ];
    let block = BlockWriter::sequential("flag", LogicalType::Boolean, &values)?;
    let column = load_native(&block, None, LoaderOptions::default())?;

    assert_eq!(column.logical_type(), LogicalType::Boolean);
    assert_eq!(cells(&column), values);
    let scalar = column.as_scalar().ok_or("not a scalar column")?;
    assert_eq!(scalar.null_count(), 3);
    assert_eq!(scalar.encoding(), EncodingKind::Sequential);
    Ok(())
}

#[test]
fn dictionary_rows_resolve_through_entries() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::dictionary(
        "city",
        LogicalType::String,
        &[Some(Value::string("a")), Some(Value::string("b"))],
        &[Some(0), Some(0), None, Some(1), Some(0)],
    )?;
    let column = load_native(&block, None, LoaderOptions::default())?;

    assert_eq!(
        cells(&column),
        vec![
            Some(Value::string("a")),
            Some(Value::string("a")),
            None,
            Some(Value::string("b")),
            Some(Value::string("a")),
        ]
    );
    let scalar = column.as_scalar().ok_or("not a scalar column")?;
    assert_eq!(scalar.encoding(), EncodingKind::Dictionary);
    assert_eq!(scalar.dictionary().map(|d| d.len()), Some(2));
    Ok(())
}

#[test]
fn null_dictionary_entries_read_as_null_rows() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::dictionary(
        "n",
        LogicalType::Integer,
        &[None, Some(Value::Integer(4))],
        &[Some(0), Some(1)],
    )?;
    let column = load_native(&block, None, LoaderOptions::default())?;
    assert_eq!(cells(&column), vec![None, Some(Value::Integer(4))]);
    assert!(column.is_null(0));
    Ok(())
}

#[test]
fn out_of_range_dictionary_index_fails() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::dictionary(
        "n",
        LogicalType::Integer,
        &[Some(Value::Integer(1))],
        &[Some(3)],
    )?;
    let err = load_native(&block, None, LoaderOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        columnar_materialize::LoadError::DictionaryIndexOutOfBounds { index: 3, len: 1 }
    ));
    Ok(())
}

#[test]
fn narrowing_stores_null_when_value_does_not_fit() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::sequential(
        "n",
        LogicalType::Integer,
        &[Some(Value::Integer(300)), Some(Value::Integer(-5)), None],
    )?;
    let schema = ColumnSchema::new("n", LogicalType::Byte);
    let column = load_native(&block, Some(&schema), LoaderOptions::default())?;

    assert_eq!(column.logical_type(), LogicalType::Byte);
    assert_eq!(cells(&column), vec![None, Some(Value::Byte(-5)), None]);
    Ok(())
}

#[test]
fn constant_covers_exactly_load_size() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::constant("c", LogicalType::String, Some(&Value::string("x")), 3)?;
    let column = load_native(&block, None, LoaderOptions::default())?;

    assert_eq!(column.len(), 3);
    assert_eq!(cells(&column), vec![Some(Value::string("x")); 3]);
    assert_eq!(column.get(3), None);
    assert_eq!(
        column.as_scalar().map(|s| s.encoding()),
        Some(EncodingKind::Constant)
    );
    Ok(())
}

#[test]
fn null_constant_is_all_null() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::constant("c", LogicalType::Double, None, 2)?;
    let column = load_native(&block, None, LoaderOptions::default())?;
    assert_eq!(cells(&column), vec![None, None]);
    Ok(())
}

#[test]
fn rows_past_row_count_are_null() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::sequential(
        "n",
        LogicalType::Long,
        &[Some(Value::Long(7)), Some(Value::Long(8))],
    )?
    .with_load_size(4);
    let column = load_native(&block, None, LoaderOptions::default())?;

    assert_eq!(
        cells(&column),
        vec![Some(Value::Long(7)), Some(Value::Long(8)), None, None]
    );
    Ok(())
}

#[test]
fn load_size_smaller_than_row_count_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::sequential(
        "n",
        LogicalType::Long,
        &[Some(Value::Long(7)), Some(Value::Long(8))],
    )?
    .with_load_size(1);
    assert!(load_native(&block, None, LoaderOptions::default()).is_err());
    Ok(())
}

#[test]
fn repetitions_expand_and_drop_rows() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::sequential(
        "n",
        LogicalType::Integer,
        &[Some(Value::Integer(1)), Some(Value::Integer(2)), None],
    )?
    .with_repetitions(vec![2, 0, 3]);
    let column = load_native(&block, None, LoaderOptions::default())?;

    assert_eq!(
        cells(&column),
        vec![
            Some(Value::Integer(1)),
            Some(Value::Integer(1)),
            None,
            None,
            None,
        ]
    );
    Ok(())
}

#[test]
fn fill_extracts_selected_rows() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::sequential(
        "n",
        LogicalType::Integer,
        &[Some(Value::Integer(10)), None, Some(Value::Integer(30))],
    )?;
    let column = load_native(&block, None, LoaderOptions::default())?;
    let scalar = column.as_scalar().ok_or("not a scalar column")?;

    let mut out = [Some(0_i64); 3];
    assert_eq!(scalar.fill(RowSelection::Indices(&[2, 1, 9]), &mut out), 3);
    assert_eq!(out, [Some(30), None, None]);

    let mut out = [None; 2];
    assert_eq!(scalar.fill(RowSelection::Range(0..3), &mut out), 2);
    assert_eq!(out, [Some(10_i8), None]);
    Ok(())
}

#[test]
fn strings_alias_the_payload_unless_copied() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::sequential("s", LogicalType::String, &[Some(Value::string("hello"))])?;
    let payload = block.payload.as_ptr_range();
    let pointer = |column: &NativeColumn| match column.get(0) {
        Some(Value::String(s)) => Some(s.as_ptr()),
        _ => None,
    };

    let shared = load_native(&block, None, LoaderOptions::default())?;
    let ptr = pointer(&shared).ok_or("missing string")?;
    assert!(payload.contains(&ptr));

    let options = LoaderOptions {
        copy_byte_slices: true,
        ..LoaderOptions::default()
    };
    let copied = load_native(&block, None, options)?;
    let ptr = pointer(&copied).ok_or("missing string")?;
    assert!(!payload.contains(&ptr));
    assert_eq!(copied.get(0), Some(Value::string("hello")));
    Ok(())
}

#[test]
fn invalid_utf8_follows_validation_option() -> Result<(), Box<dyn std::error::Error>> {
    let block = BlockWriter::sequential("b", LogicalType::Bytes, &[Some(Value::bytes(&[0xff, b'a']))])?;
    let schema = ColumnSchema::new("b", LogicalType::String);

    let validated = load_native(&block, Some(&schema), LoaderOptions::default())?;
    assert_eq!(validated.get(0), None);

    let options = LoaderOptions {
        validate_utf8: false,
        ..LoaderOptions::default()
    };
    let raw = load_native(&block, Some(&schema), options)?;
    assert_eq!(
        raw.get(0),
        Some(Value::String(ByteSlice::copy_from_slice(&[0xff, b'a'])))
    );
    Ok(())
}

proptest! {
    #[test]
    fn narrowing_to_byte_keeps_only_representable_values(value in any::<i32>()) {
        let block = BlockWriter::sequential("n", LogicalType::Integer, &[Some(Value::Integer(value))])
            .unwrap();
        let schema = ColumnSchema::new("n", LogicalType::Byte);
        let column = load_native(&block, Some(&schema), LoaderOptions::default()).unwrap();
        let expected = i8::try_from(value).ok().map(Value::Byte);
        prop_assert_eq!(column.get(0), expected);
    }
}
