mod analysis;
mod decrypt;
mod encoding;
mod encrypt;
mod error;
mod oracle;
mod padding;
mod predicate;
mod probe;
#[cfg(test)]
mod simulated;

pub use analysis::{analyse_responses, survey_payload, ResponseAnalysis};
pub use decrypt::{padding_oracle_decrypt, DecryptOptions};
pub use encoding::{decode_input, EncodingError, PayloadEncoder, PayloadEncoding};
pub use encrypt::{padding_oracle_encrypt, EncryptOptions};
pub use error::{Error, TransportError};
pub use oracle::http::{HttpTransport, RenderedRequest, RequestTemplate, PAYLOAD_MARKER};
pub use oracle::{NetworkStats, OracleCaller, OracleConfig, OracleResult, Transport};
pub use padding::{pkcs7_pad, pkcs7_padding_len, pkcs7_unpad};
pub use predicate::{Condition, Predicate, PredicateError};
pub use probe::IntermediateBlock;
