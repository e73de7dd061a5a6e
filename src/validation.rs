//! Request validation
//!
//! Runs before any side effect and reports every violated constraint at
//! once as [`ServiceError::InvalidParams`].

use crate::error::{InvalidParam, InvalidParams, ServiceResult};
use crate::models::SizeRequest;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Validate)]
struct UploadFields {
    #[validate(length(min = 1, max = 255))]
    filename: String,
    #[validate(range(min = 1))]
    byte_size: u64,
    #[validate(length(min = 1, max = 255))]
    mime_type: String,
}

#[derive(Debug, Validate)]
struct ListFields {
    #[validate(range(min = 1, max = 1000))]
    limit: usize,
}

/// Flattens validator output into `{field, constraint}` pairs under `prefix`.
fn collect(prefix: &str, result: Result<(), ValidationErrors>) -> InvalidParams {
    let Err(errors) = result else {
        return InvalidParams::default();
    };

    let mut params: Vec<InvalidParam> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errors)| {
            let field = format!("{}{}", prefix, field);
            errors
                .iter()
                .map(move |error| InvalidParam::new(field.clone(), error.code.to_string()))
        })
        .collect();
    params.sort_by(|a, b| a.field.cmp(&b.field).then(a.constraint.cmp(&b.constraint)));

    InvalidParams(params)
}

pub fn validate_sizes(sizes: &[SizeRequest]) -> InvalidParams {
    let mut params = InvalidParams::default();
    for (index, size) in sizes.iter().enumerate() {
        params.extend(collect(&format!("sizes[{}].", index), size.validate()));
    }
    params
}

pub fn validate_upload(
    filename: &str,
    byte_size: u64,
    mime_type: &str,
    sizes: &[SizeRequest],
) -> ServiceResult<()> {
    let fields = UploadFields {
        filename: filename.to_string(),
        byte_size,
        mime_type: mime_type.to_string(),
    };

    let mut params = collect("", fields.validate());
    params.extend(validate_sizes(sizes));
    params.into_result()
}

pub fn validate_resize(sizes: &[SizeRequest]) -> ServiceResult<()> {
    validate_sizes(sizes).into_result()
}

pub fn validate_list(limit: usize) -> ServiceResult<()> {
    collect("", ListFields { limit }.validate()).into_result()
}
