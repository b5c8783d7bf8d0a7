mod bus;
mod control;
mod host;
mod relay;
mod remote;
mod settings;
mod timer_light;
mod web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
