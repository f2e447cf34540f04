use crate::error::AppError;
use crate::request::Request;

/// Fallback for requests no route matched.
///
/// Never answers by itself: it classifies the request as a 404
/// `Route <METHOD> <ORIGINAL_URL> not found` error and forwards it to the
/// error handler. This is the router's default fallback.
pub async fn not_found(req: Request) -> AppError {
    AppError::not_found(req.method().as_str(), req.original_url())
}
