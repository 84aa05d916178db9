pub mod aggregator;
pub mod api_response;
pub mod app_config;
pub mod db_driver;
pub mod prober;
pub mod rmp_serializer;
pub mod scheduler;
pub mod seeder;
pub mod shared_state;
