//! Header names, query parameters and default values of the Riak REST API.

pub const HDR_ACCEPT: &str = "Accept";
pub const HDR_CONTENT_TYPE: &str = "Content-Type";
pub const HDR_CONNECTION: &str = "Connection";
pub const HDR_CLIENT_ID: &str = "X-Riak-ClientId";
pub const HDR_VCLOCK: &str = "X-Riak-Vclock";
pub const HDR_LINK: &str = "Link";
pub const HDR_USERMETA_PREFIX: &str = "X-Riak-Meta-";

pub const CTYPE_JSON: &str = "application/json";
pub const CTYPE_OCTET_STREAM: &str = "application/octet-stream";

pub const QP_KEYS: &str = "keys";
pub const QP_R: &str = "r";

pub const INCLUDE_KEYS: &str = "true";
pub const NO_KEYS: &str = "false";
pub const STREAM_KEYS: &str = "stream";

pub const DEFAULT_R: u32 = 2;

pub const DEFAULT_URL: &str = "http://127.0.0.1:8098/riak";
pub const DEFAULT_MAPRED_PATH: &str = "/mapred";
