//! Traffic split between the application and an endpoint
//!
//! Canary sends `100 - w` to the main service and `w` to the endpoint
//! service, in that order. Primary sends everything to the endpoint service.
//! Weights always sum to 100.

use crate::crd::RoutingStrategy;

/// One weighted backend, before it is rendered into a route
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightedBackend {
    /// Service name
    pub service: String,
    /// Share of matched traffic, in percent
    pub weight: i32,
}

/// Ordered backends for an endpoint route
pub fn backend_weights(
    strategy: RoutingStrategy,
    main_service: &str,
    endpoint_service: &str,
) -> Vec<WeightedBackend> {
    match strategy {
        RoutingStrategy::Canary { weight } => {
            let weight = weight.clamp(0, 100);
            vec![
                WeightedBackend {
                    service: main_service.to_string(),
                    weight: 100 - weight,
                },
                WeightedBackend {
                    service: endpoint_service.to_string(),
                    weight,
                },
            ]
        }
        RoutingStrategy::Primary => vec![WeightedBackend {
            service: endpoint_service.to_string(),
            weight: 100,
        }],
    }
}
