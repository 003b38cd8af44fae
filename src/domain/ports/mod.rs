mod gateway_info_port;

pub use gateway_info_port::{GatewayBotInfo, GatewayInfoPort, SessionStartLimit};
