mod peer_state;
mod report;
mod sim_dut;
mod sim_time;
mod wire_codec;
