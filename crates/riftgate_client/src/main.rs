mod app;
mod camera;
mod input;
mod portal;
mod renderer;
mod scene;
mod traveler;

fn main() {
    app::run();
}
