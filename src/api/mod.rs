pub mod x_api;
