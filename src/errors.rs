use actix_web::http::StatusCode;
use std::fmt;

/// 定义错误类型的宏
///
/// 自动生成：
/// - enum 定义
/// - code() 方法（稳定错误码，客户端按此分支）
/// - kind() 方法（错误类别名称）
/// - status() 方法（HTTP 状态码）
macro_rules! define_linkhop_errors {
    ($(
        $variant:ident($code:literal, $kind:literal, $status:expr)
    ),* $(,)?) => {
        #[derive(Debug, Clone)]
        pub enum AppError {
            $($variant(String),)*
        }

        impl AppError {
            /// 获取稳定错误码
            pub fn code(&self) -> &'static str {
                match self {
                    $(AppError::$variant(_) => $code,)*
                }
            }

            /// 获取错误类别名称
            pub fn kind(&self) -> &'static str {
                match self {
                    $(AppError::$variant(_) => $kind,)*
                }
            }

            /// 获取对应的 HTTP 状态码
            pub fn status(&self) -> StatusCode {
                match self {
                    $(AppError::$variant(_) => $status,)*
                }
            }

            /// 获取错误详情
            pub fn message(&self) -> &str {
                match self {
                    $(AppError::$variant(msg) => msg,)*
                }
            }
        }
    };
}

define_linkhop_errors! {
    InvalidRequest("INVALID_REQUEST", "Validation", StatusCode::BAD_REQUEST),
    InvalidUrl("INVALID_URL", "Validation", StatusCode::BAD_REQUEST),
    MaliciousUrl("MALICIOUS_URL", "Validation", StatusCode::BAD_REQUEST),
    Unauthorized("UNAUTHORIZED", "Unauthorized", StatusCode::UNAUTHORIZED),
    Forbidden("FORBIDDEN", "Forbidden", StatusCode::FORBIDDEN),
    NotFound("NOT_FOUND", "NotFound", StatusCode::NOT_FOUND),
    AliasTaken("ALIAS_TAKEN", "Conflict", StatusCode::CONFLICT),
    RateLimited("RATE_LIMIT_EXCEEDED", "RateLimited", StatusCode::TOO_MANY_REQUESTS),
    UpstreamUnavailable("UPSTREAM_UNAVAILABLE", "UpstreamUnavailable", StatusCode::SERVICE_UNAVAILABLE),
    Internal("INTERNAL_ERROR", "Internal", StatusCode::INTERNAL_SERVER_ERROR),
    ClockRegression("CLOCK_REGRESSION", "ClockRegression", StatusCode::INTERNAL_SERVER_ERROR),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for AppError {}

// 便捷的构造函数
impl AppError {
    pub fn invalid_request<T: Into<String>>(msg: T) -> Self {
        AppError::InvalidRequest(msg.into())
    }

    pub fn invalid_url<T: Into<String>>(msg: T) -> Self {
        AppError::InvalidUrl(msg.into())
    }

    pub fn malicious_url<T: Into<String>>(msg: T) -> Self {
        AppError::MaliciousUrl(msg.into())
    }

    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn alias_taken<T: Into<String>>(msg: T) -> Self {
        AppError::AliasTaken(msg.into())
    }

    pub fn rate_limited<T: Into<String>>(msg: T) -> Self {
        AppError::RateLimited(msg.into())
    }

    pub fn upstream_unavailable<T: Into<String>>(msg: T) -> Self {
        AppError::UpstreamUnavailable(msg.into())
    }

    pub fn internal<T: Into<String>>(msg: T) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn clock_regression<T: Into<String>>(msg: T) -> Self {
        AppError::ClockRegression(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
