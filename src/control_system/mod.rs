pub mod traffic_light;
