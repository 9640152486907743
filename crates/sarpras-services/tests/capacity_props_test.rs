//! Property tests for pooled equipment capacity

mod common;

#[cfg(test)]
mod tests {
    use crate::common::*;
    use proptest::prelude::*;
    use sarpras_core::AppError;
    use uuid::Uuid;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Whatever order requests arrive in, the bookings that get accepted
        /// never claim more chairs than are in stock at any hour.
        #[test]
        fn prop_accepted_claims_fit_stock(
            requests in prop::collection::vec((0i64..20, 1i64..6, 1i32..30), 1..12)
        ) {
            tokio_test::block_on(async {
                let fx = Fixture::new().await;
                let mut accepted: Vec<(i64, i64, i32)> = Vec::new();

                for (start, len, quantity) in requests {
                    let result = fx
                        .engine
                        .lifecycle
                        .create(
                            Uuid::new_v4(),
                            equipment_request(&[(fx.chairs, quantity)], start, start + len),
                        )
                        .await;
                    match result {
                        Ok(_) => accepted.push((start, start + len, quantity)),
                        Err(AppError::Conflict { .. }) => {}
                        Err(e) => panic!("unexpected error: {:?}", e),
                    }
                }

                for hour in 0..26 {
                    let claimed: i32 = accepted
                        .iter()
                        .filter(|(from, to, _)| *from <= hour && hour < *to)
                        .map(|(_, _, quantity)| quantity)
                        .sum();
                    assert!(claimed <= 50, "{} chairs claimed at hour {}", claimed, hour);
                }
            });
        }
    }
}
