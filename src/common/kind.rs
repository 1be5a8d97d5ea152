use crate::MiniBertError;
use tch::{Kind, Scalar};

/// Most negative finite value representable by a floating point kind.
///
/// Used as the masking sentinel for attention scores: unlike `-inf`, a row made
/// only of this value still normalizes to finite weights.
pub(crate) fn get_min(kind: Kind) -> Result<Scalar, MiniBertError> {
    Ok(match kind {
        Kind::Float => Scalar::float(f32::MIN.into()),
        Kind::Double => Scalar::float(f64::MIN),
        _ => {
            return Err(MiniBertError::ValueError(format!(
                "Type not supported: attempted to get minimum value for {:?}",
                kind
            )))
        }
    })
}
