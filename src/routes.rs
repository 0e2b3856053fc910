use crate::{
    api::{attendance, leave, overtime},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};

// Per-peer limiter allowing `requests_per_min` with an equal burst
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default();
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let batch_limiter = || build_limiter(config.rate_batch_per_min);

    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(build_limiter(config.rate_protected_per_min)) // rate limiting
            .service(
                web::scope("/attendance")
                    .service(web::resource("/clock").route(web::post().to(attendance::clock)))
                    .service(
                        web::resource("/timesheets/{id}")
                            .route(web::get().to(attendance::get_timesheet)),
                    )
                    .service(
                        web::resource("/materialize")
                            .wrap(batch_limiter())
                            .route(web::post().to(attendance::materialize)),
                    )
                    .service(
                        web::resource("/adjustments")
                            .route(web::post().to(attendance::create_adjustment)),
                    )
                    .service(
                        web::resource("/adjustments/{id}/approve")
                            .route(web::put().to(attendance::approve_adjustment)),
                    )
                    .service(
                        web::resource("/adjustments/{id}/decline")
                            .route(web::put().to(attendance::decline_adjustment)),
                    ),
            )
            .service(
                web::scope("/overtime")
                    .service(
                        web::resource("/generate")
                            .wrap(batch_limiter())
                            .route(web::post().to(overtime::generate)),
                    )
                    .service(
                        web::resource("/generate/queue")
                            .wrap(batch_limiter())
                            .route(web::post().to(overtime::enqueue_generate)),
                    )
                    .service(
                        web::resource("/timesheets/{id}/recalibrate")
                            .route(web::post().to(overtime::recalibrate)),
                    ),
            )
            .service(
                web::scope("/leave")
                    // /leave/accounts
                    .service(
                        web::resource("/accounts").route(web::post().to(leave::assign_account)),
                    )
                    // /leave/accounts/{id}
                    .service(
                        web::resource("/accounts/{id}")
                            .route(web::get().to(leave::get_account))
                            .route(web::delete().to(leave::archive_account)),
                    )
                    .service(
                        web::resource("/accounts/{id}/balance")
                            .route(web::put().to(leave::edit_balance)),
                    )
                    // /leave/requests
                    .service(
                        web::resource("/requests").route(web::post().to(leave::create_request)),
                    )
                    .service(
                        web::resource("/requests/{id}/approve")
                            .route(web::put().to(leave::approve_request)),
                    )
                    .service(
                        web::resource("/requests/{id}/deny")
                            .route(web::put().to(leave::deny_request)),
                    )
                    .service(
                        web::resource("/requests/{id}/cancel")
                            .route(web::put().to(leave::cancel_request)),
                    )
                    .service(
                        web::resource("/cycle")
                            .wrap(batch_limiter())
                            .route(web::post().to(leave::run_cycle)),
                    ),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_builds_for_zero_rate() {
        // zero would make the builder reject its config
        let _ = build_limiter(0);
        let _ = build_limiter(100_000);
    }
}
