pub mod _structs;
pub mod alerts;
pub mod eta;
pub mod nearest_stop;
pub mod proximity;
pub mod route_search;

pub use alerts::{vehicles_near_point, NearbyVehicle};
pub use eta::{estimate_arrival, estimate_arrival_on_route, soonest_arrival, vehicle_etas, EtaError};
pub use nearest_stop::{find_nearest_stop, NearestStop};
pub use proximity::find_routes_near_point;
pub use route_search::{find_candidates, SearchOptions};
