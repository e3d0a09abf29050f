use bytes::Bytes;
use columnar_materialize::{
    select_variant, BlockWriter, ColumnSchema, EncodedColumnBlock, EncodingKind, LoadError,
    LoaderFactory, LoaderOptions, LoaderVariant, LogicalType, NativeColumn, NativeLoaderFactory,
    Value,
};
use pretty_assertions::assert_eq;

fn header(ty: LogicalType, encoding: EncodingKind, rows: u32) -> EncodedColumnBlock {
    EncodedColumnBlock::new("c", ty, encoding, rows, Bytes::new())
}

#[test]
fn variants_follow_shape_then_type_then_encoding() {
    let cases = [
        (LogicalType::Integer, EncodingKind::Sequential, LoaderVariant::Sequential),
        (LogicalType::String, EncodingKind::Constant, LoaderVariant::Constant),
        (LogicalType::Double, EncodingKind::Dictionary, LoaderVariant::Dictionary),
        (LogicalType::Array, EncodingKind::Sequential, LoaderVariant::Array),
        (LogicalType::Array, EncodingKind::RunLengthArray, LoaderVariant::RunLengthArray),
        (LogicalType::Struct, EncodingKind::Sequential, LoaderVariant::Struct),
        (LogicalType::Map, EncodingKind::Sequential, LoaderVariant::Map),
        (LogicalType::Union, EncodingKind::Union, LoaderVariant::Union),
        (LogicalType::Null, EncodingKind::Sequential, LoaderVariant::Null),
        (LogicalType::Long, EncodingKind::Null, LoaderVariant::Null),
    ];
    for (ty, encoding, expected) in cases {
        assert_eq!(
            select_variant(&header(ty, encoding, 1), None).ok(),
            Some(expected),
            "{ty:?}/{encoding:?}"
        );
    }
}

#[test]
fn unknown_combinations_are_errors_not_nulls() {
    for (ty, encoding) in [
        (LogicalType::Integer, EncodingKind::RunLengthArray),
        (LogicalType::Struct, EncodingKind::Dictionary),
        (LogicalType::Array, EncodingKind::Constant),
    ] {
        assert!(matches!(
            select_variant(&header(ty, encoding, 1), None),
            Err(LoadError::UnsupportedEncoding { .. })
        ));
    }
}

#[test]
fn schema_shape_must_agree_with_block() {
    let schema = ColumnSchema::array("c", ColumnSchema::new("item", LogicalType::Integer));
    assert!(select_variant(&header(LogicalType::Struct, EncodingKind::Sequential, 1), Some(&schema)).is_err());

    let schema = ColumnSchema::new("c", LogicalType::Struct);
    assert_eq!(
        select_variant(&header(LogicalType::Map, EncodingKind::Sequential, 1), Some(&schema)).ok(),
        Some(LoaderVariant::Struct)
    );
}

#[test]
fn loaders_can_be_driven_by_hand() -> Result<(), Box<dyn std::error::Error>> {
    let block = header(LogicalType::Integer, EncodingKind::Sequential, 3);
    let mut factory = NativeLoaderFactory::new(LoaderOptions::default());
    let mut loader = factory.create(&block, 3)?;

    assert_eq!(loader.variant(), LoaderVariant::Sequential);
    assert_eq!(loader.load_size(), 3);
    loader.set_long(0, 40)?;
    loader.set_double(1, 2.5)?;
    loader.set_byte(2, -1)?;
    loader.finish()?;
    let column = loader.build()?;

    assert_eq!(
        (0..3).map(|row| column.get(row)).collect::<Vec<_>>(),
        vec![Some(Value::Integer(40)), None, Some(Value::Integer(-1))]
    );
    Ok(())
}

#[test]
fn string_payload_ranges_are_bounds_checked() -> Result<(), Box<dyn std::error::Error>> {
    let block = header(LogicalType::String, EncodingKind::Sequential, 1);
    let mut factory = NativeLoaderFactory::new(LoaderOptions::default());
    let mut loader = factory.create(&block, 1)?;
    let buffer = Bytes::from_static(b"abcdef");

    assert!(loader.set_string(0, &buffer, 4, 3).is_err());
    loader.set_string(0, &buffer, 1, 3)?;
    loader.finish()?;
    assert_eq!(loader.build()?.get(0), Some(Value::string("bcd")));
    Ok(())
}

#[test]
fn lifecycle_is_enforced() -> Result<(), Box<dyn std::error::Error>> {
    let block = header(LogicalType::Integer, EncodingKind::Sequential, 2);
    let mut factory = NativeLoaderFactory::new(LoaderOptions::default());

    let loader = factory.create(&block, 2)?;
    assert!(matches!(loader.build(), Err(LoadError::NotFinished)));

    let mut loader = factory.create(&block, 2)?;
    loader.finish()?;
    loader.finish()?;
    assert!(matches!(loader.set_integer(0, 1), Err(LoadError::Finished)));
    assert!(matches!(
        loader.set_integer(5, 1),
        Err(LoadError::Finished | LoadError::RowOutOfBounds { .. })
    ));
    Ok(())
}

#[test]
fn rows_outside_load_size_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let block = header(LogicalType::Integer, EncodingKind::Sequential, 2);
    let mut factory = NativeLoaderFactory::new(LoaderOptions::default());
    let mut loader = factory.create(&block, 2)?;
    assert!(matches!(
        loader.set_integer(2, 1),
        Err(LoadError::RowOutOfBounds { index: 2, len: 2 })
    ));
    Ok(())
}

#[test]
fn foreign_operations_are_unsupported() -> Result<(), Box<dyn std::error::Error>> {
    let block = header(LogicalType::Integer, EncodingKind::Sequential, 1);
    let mut factory = NativeLoaderFactory::new(LoaderOptions::default());
    let mut loader = factory.create(&block, 1)?;

    assert!(matches!(
        loader.create_dictionary(2),
        Err(LoadError::UnsupportedOperation {
            operation: "create_dictionary",
            variant: LoaderVariant::Sequential
        })
    ));
    assert!(matches!(
        loader.set_array_index(0, 0, 1),
        Err(LoadError::UnsupportedOperation { .. })
    ));
    assert!(matches!(
        loader.load_child(&block, 1),
        Err(LoadError::UnsupportedOperation { .. })
    ));
    Ok(())
}

#[test]
fn dictionary_must_exist_before_use() -> Result<(), Box<dyn std::error::Error>> {
    let block = header(LogicalType::String, EncodingKind::Dictionary, 1);
    let mut factory = NativeLoaderFactory::new(LoaderOptions::default());
    let mut loader = factory.create(&block, 1)?;
    assert!(matches!(
        loader.set_dictionary_index(0, 0),
        Err(LoadError::DictionaryNotCreated)
    ));
    Ok(())
}

#[test]
fn constant_rows_can_be_nulled_individually() -> Result<(), Box<dyn std::error::Error>> {
    let block = header(LogicalType::Short, EncodingKind::Constant, 3);
    let mut factory = NativeLoaderFactory::new(LoaderOptions::default());
    let mut loader = factory.create(&block, 3)?;
    loader.set_const_from_integer(12)?;
    loader.set_null(1)?;
    loader.finish()?;
    let column = loader.build()?;
    assert_eq!(
        (0..3).map(|row| column.get(row)).collect::<Vec<_>>(),
        vec![Some(Value::Short(12)), None, Some(Value::Short(12))]
    );
    Ok(())
}

#[test]
fn declared_null_blocks_skip_decoding() -> Result<(), Box<dyn std::error::Error>> {
    let block = EncodedColumnBlock::null("gone", 4);
    let mut factory = NativeLoaderFactory::new(LoaderOptions::default());
    assert!(factory.create(&block, 4)?.is_loading_skipped());
    assert_eq!(factory.load(&block)?, NativeColumn::Null(4));
    Ok(())
}

#[test]
fn truncated_payload_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut block = BlockWriter::sequential(
        "n",
        LogicalType::Long,
        &[Some(Value::Long(1)), Some(Value::Long(2))],
    )?;
    block.payload = block.payload.slice(..block.payload.len() - 1);
    assert!(matches!(
        NativeLoaderFactory::new(LoaderOptions::default()).load(&block),
        Err(LoadError::InvalidBlock(_))
    ));
    Ok(())
}

#[test]
fn dictionary_size_is_checked_against_payload() {
    let block = EncodedColumnBlock::new(
        "d",
        LogicalType::Integer,
        EncodingKind::Dictionary,
        0,
        0xFFFF_FFF0_u32.to_le_bytes().to_vec(),
    );
    assert!(matches!(
        NativeLoaderFactory::new(LoaderOptions::default()).load(&block),
        Err(LoadError::InvalidBlock(_))
    ));
}
