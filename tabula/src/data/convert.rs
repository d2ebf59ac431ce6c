//! Conversions from values into rows sources and sinks.

use std::sync::Arc;

use crate::{
    data::{
        Column, FrameIterator, InputIterator, InputObject, IteratorObject, OutputObject, Row,
        RowObject, RowsFrame, RowsIterator, SharedInput, SharedIteratorReader, SharedOutput,
        SourceFactory,
    },
    error::{Error, ExecResult},
    types::Value,
};

/// Name of the column produced when a scalar is read as rows.
pub const SCALAR_COLUMN: &str = "value";

/// Reads a value as rows.
///
/// Iterators and inputs are read as they are (opened inputs are only
/// rewound, the others are opened on the first pull), a single row becomes a one-row frame, null
/// becomes an empty one and any other scalar a single cell.
pub async fn to_iterator(value: &Value) -> ExecResult<Box<dyn RowsIterator>> {
    if let Some(IteratorObject(iterator)) = value.downcast_object::<IteratorObject>() {
        return Ok(Box::new(SharedIteratorReader::new(Arc::clone(iterator)).await));
    }
    if let Some(input) = value.downcast_object::<InputObject>() {
        let owned = !input.is_opened();
        return Ok(Box::new(InputIterator::new(Arc::clone(input.input()), owned).await));
    }
    let frame = match value {
        Value::Null => RowsFrame::default(),
        Value::Object(object) => match object.downcast_ref::<RowObject>() {
            Some(row) => {
                let mut frame = RowsFrame::new(row.columns().to_vec());
                frame.push(row.row().clone())?;
                frame
            }
            None => return Err(Error::conversion(value, crate::types::DataType::Object)),
        },
        scalar => {
            let mut frame = RowsFrame::new(vec![Column::new(SCALAR_COLUMN, scalar.data_type())]);
            frame.push(Row::from(vec![scalar.clone()]))?;
            frame
        }
    };
    Ok(Box::new(FrameIterator::new(Arc::new(frame))))
}

/// Resolves a value into an input: either the input itself or a name for
/// the source factory. The flag tells whether the input is owned by the
/// caller, i.e., not opened yet and to be closed by the caller.
pub async fn to_input(value: &Value, sources: &dyn SourceFactory) -> ExecResult<(SharedInput, bool)> {
    if let Some(input) = value.downcast_object::<InputObject>() {
        return Ok((Arc::clone(input.input()), !input.is_opened()));
    }
    match value {
        Value::String(uri) => Ok((sources.create_input(uri).await?, true)),
        other => Err(Error::ExecError(format!(
            "`{other}` is not a rows input nor a source name"
        ))),
    }
}

/// Resolves a value into an output, see [`to_input`].
pub async fn to_output(value: &Value, sources: &dyn SourceFactory) -> ExecResult<SharedOutput> {
    if let Some(OutputObject(output)) = value.downcast_object::<OutputObject>() {
        return Ok(Arc::clone(output));
    }
    match value {
        Value::String(uri) => sources.create_output(uri).await,
        other => Err(Error::ExecError(format!(
            "`{other}` is not a rows output nor a source name"
        ))),
    }
}
