use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use riftgate_shared::layers::{register_portal_layers, LayerRegistry, LayerSet};
use riftgate_shared::plane::{extract_frustum_planes, Pose};
use riftgate_shared::trigger::{OverlapTracker, TriggerEvent};

use crate::camera::Camera;
use crate::input::InputState;
use crate::portal::{PortalEnd, PortalPair, PortalVolume};
use crate::renderer::Renderer;
use crate::scene::{DemoScene, PLAYER_EYE_HEIGHT};
use crate::traveler::TravelerSet;

use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{CursorGrabMode, Window, WindowId};

const SETTINGS_PATH: &str = "settings.toml";
const WALK_SPEED: f32 = 3.5;
const MOUSE_SENSITIVITY_SCALE: f32 = 0.0022;
const MAX_FRAME_DT: f32 = 0.05;
const FPS_LOG_INTERVAL_SECS: f32 = 1.0;
const TELEPORT_EPSILON: f32 = 1e-3;
const MIN_MOUSE_SENSITIVITY: f32 = 0.1;
const MAX_MOUSE_SENSITIVITY: f32 = 10.0;
const MIN_FOV: f32 = 45.0;
const MAX_FOV: f32 = 110.0;
const MIN_PORTAL_RENDER_SCALE: f32 = 0.25;
const MAX_PORTAL_RENDER_SCALE: f32 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClientSettings {
    #[serde(default = "default_mouse_sensitivity")]
    mouse_sensitivity: f32,
    #[serde(default = "default_fov")]
    fov: f32,
    #[serde(default = "default_portal_render_scale")]
    portal_render_scale: f32,
    #[serde(default)]
    show_fps: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            mouse_sensitivity: default_mouse_sensitivity(),
            fov: default_fov(),
            portal_render_scale: default_portal_render_scale(),
            show_fps: false,
        }
    }
}

impl ClientSettings {
    fn sanitize(mut self) -> Self {
        self.mouse_sensitivity = self
            .mouse_sensitivity
            .clamp(MIN_MOUSE_SENSITIVITY, MAX_MOUSE_SENSITIVITY);
        self.fov = self.fov.clamp(MIN_FOV, MAX_FOV);
        self.portal_render_scale = self
            .portal_render_scale
            .clamp(MIN_PORTAL_RENDER_SCALE, MAX_PORTAL_RENDER_SCALE);
        self
    }

    fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let parsed = toml::from_str::<Self>(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize settings: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    fn save(&self, path: &Path) -> io::Result<()> {
        let settings = self.clone().sanitize();
        let serialized = toml::to_string_pretty(&settings).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize settings: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }
}

fn default_mouse_sensitivity() -> f32 {
    2.5
}

fn default_fov() -> f32 {
    70.0
}

fn default_portal_render_scale() -> f32 {
    1.0
}

fn load_or_create_settings(path: &Path) -> ClientSettings {
    match ClientSettings::load(path) {
        Ok(settings) => settings,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let settings = ClientSettings::default();
            if let Err(save_err) = settings.save(path) {
                warn!(
                    "Failed to create default settings at {}: {save_err}",
                    path.display()
                );
            }
            settings
        }
        Err(err) => {
            warn!("Failed to load settings from {}: {err}", path.display());
            let settings = ClientSettings::default();
            if let Err(save_err) = settings.save(path) {
                warn!(
                    "Failed to overwrite settings at {}: {save_err}",
                    path.display()
                );
            }
            settings
        }
    }
}

pub struct ClientApp {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    settings: ClientSettings,
    camera: Camera,
    input: InputState,
    cursor_grabbed: bool,

    travelers: TravelerSet,
    pair: PortalPair,
    scene: DemoScene,
    tracker: OverlapTracker<PortalVolume>,
    trigger_events: Vec<TriggerEvent<PortalVolume>>,

    last_frame: Option<Instant>,
    fps_sample_start: Option<Instant>,
    fps_frame_count: u32,
}

impl Default for ClientApp {
    fn default() -> Self {
        let settings = load_or_create_settings(Path::new(SETTINGS_PATH));

        let mut registry = LayerRegistry::new();
        register_portal_layers(&mut registry);
        let layers = LayerSet::resolve(&registry);

        let mut travelers = TravelerSet::new();
        let scene = DemoScene::build(&layers, &mut travelers);
        let pair = PortalPair::new(scene.portal_a, scene.portal_b, layers);

        let mut camera = Camera::default();
        camera.fov = settings.fov.to_radians();
        if let Some(player) = travelers.get(scene.player) {
            camera.position = player.pose.position + Vec3::Y * PLAYER_EYE_HEIGHT;
            camera.look_along(player.pose.forward());
        }

        Self {
            window: None,
            renderer: None,
            settings,
            camera,
            input: InputState::default(),
            cursor_grabbed: false,
            travelers,
            pair,
            scene,
            tracker: OverlapTracker::new(),
            trigger_events: Vec::new(),
            last_frame: None,
            fps_sample_start: None,
            fps_frame_count: 0,
        }
    }
}

impl ClientApp {
    fn set_cursor_grab(&mut self, enabled: bool) {
        let Some(window) = self.window.as_ref() else {
            self.cursor_grabbed = false;
            return;
        };

        let grabbed = if enabled {
            window
                .set_cursor_grab(CursorGrabMode::Locked)
                .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined))
                .is_ok()
        } else {
            let _ = window.set_cursor_grab(CursorGrabMode::None);
            false
        };

        window.set_cursor_visible(!grabbed);
        self.cursor_grabbed = grabbed;
    }

    fn step_simulation(&mut self, dt: f32) {
        let sensitivity = self.settings.mouse_sensitivity * MOUSE_SENSITIVITY_SCALE;
        if self.cursor_grabbed {
            self.camera.update_look(&self.input, sensitivity);
        }

        let movement = self.camera.horizontal_movement_dir(&self.input) * WALK_SPEED;
        self.camera.position += movement * dt;

        // The player's body tracks the camera: feet below the eye, facing
        // the horizontal look direction.
        if let Some(player) = self.travelers.get_mut(self.scene.player) {
            player.pose.position = self.camera.position - Vec3::Y * PLAYER_EYE_HEIGHT;
            player.pose.rotation =
                Quat::from_rotation_y(std::f32::consts::FRAC_PI_2 - self.camera.yaw);
            player.velocity = movement;
        }

        self.scene.drive_cube(&mut self.travelers, dt);
        self.travelers.sync_all_shapes();

        let volumes = self.pair.trigger_volumes();
        let shapes: Vec<_> = self.travelers.shape_bounds().collect();
        self.trigger_events.clear();
        self.tracker
            .step(&volumes, &shapes, &mut self.trigger_events);
        self.pair
            .handle_trigger_events(&self.trigger_events, &mut self.travelers);

        let player_before = self
            .travelers
            .get(self.scene.player)
            .map(|player| player.pose);
        self.pair.update_travelers(PortalEnd::A, &mut self.travelers);
        self.pair.update_travelers(PortalEnd::B, &mut self.travelers);
        self.resync_camera_after_teleport(player_before.as_ref());
    }

    /// Carries the camera through a player teleport: the body pose has
    /// already been mapped to the destination portal, so the eye position
    /// and look direction get the same rotation applied.
    fn resync_camera_after_teleport(&mut self, before: Option<&Pose>) {
        let Some(before) = before else {
            return;
        };
        let Some(player) = self.travelers.get(self.scene.player) else {
            return;
        };
        if player.pose.position.distance(before.position) < TELEPORT_EPSILON {
            return;
        }

        let rotation_delta = player.pose.rotation * before.rotation.inverse();
        let new_look = rotation_delta * self.camera.forward_direction();
        self.camera.position = player.pose.position + Vec3::Y * PLAYER_EYE_HEIGHT;
        self.camera.look_along(new_look);
        info!(
            "Player teleported; camera moved to {:?}",
            self.camera.position
        );
    }

    fn update_and_render(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = self.window.as_ref().cloned() else {
            return;
        };
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.camera.aspect = size.width as f32 / size.height as f32;

        let now = Instant::now();
        let dt = self
            .last_frame
            .map(|last| (now - last).as_secs_f32())
            .unwrap_or(1.0 / 60.0)
            .min(MAX_FRAME_DT);
        self.last_frame = Some(now);

        self.step_simulation(dt);

        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        renderer.begin_frame();

        let corner_dist = self.camera.near_plane_corner_distance();
        let frustum = extract_frustum_planes(self.camera.view_projection_matrix());
        let player_pose = self.camera.pose();

        // Seed slice planes before the portal views; the view passes
        // only override the offsets, not the planes themselves.
        for end in PortalEnd::BOTH {
            self.pair
                .update_traveler_slices(end, self.camera.position, &mut self.travelers);
        }

        for end in self.pair.visible_ends(&frustum) {
            renderer.ensure_portal_targets();
            self.pair.place_render_camera(end, &player_pose);
            let view = self.pair.portal(end).render_camera().to_matrix().inverse();
            let clip = self.pair.compute_oblique_clip_plane(end, view);
            self.pair
                .avoid_self_clipping(end, corner_dist, &mut self.travelers);
            renderer.render_portal_view(end, &self.pair, &self.travelers, &self.camera, clip);
        }

        // Restore player-view slice planes and screen thickness before the
        // main pass; the portal passes above overrode them for their own
        // camera positions.
        for end in PortalEnd::BOTH {
            self.pair
                .update_traveler_slices(end, self.camera.position, &mut self.travelers);
            self.pair
                .update_screen_thickness(end, self.camera.position, corner_dist);
        }

        match renderer.render_main_view(
            &self.pair,
            &self.travelers,
            &self.camera,
            Some(self.scene.player),
        ) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                renderer.resize(size.width, size.height);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                error!("Surface out of memory; shutting down");
                event_loop.exit();
            }
            Err(_) => {}
        }

        self.fps_frame_count += 1;
        if let Some(start) = self.fps_sample_start {
            let elapsed = (now - start).as_secs_f32();
            if elapsed >= FPS_LOG_INTERVAL_SECS {
                if self.settings.show_fps {
                    let stats = renderer.frame_stats();
                    info!(
                        "{:.0} fps, {} portal view pass(es), {} draw calls",
                        self.fps_frame_count as f32 / elapsed,
                        stats.portal_view_passes,
                        stats.draw_calls
                    );
                }
                self.fps_sample_start = Some(now);
                self.fps_frame_count = 0;
            }
        } else {
            self.fps_sample_start = Some(now);
        }

        self.input.clear_frame();
    }
}

impl ApplicationHandler for ClientApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes().with_title("Riftgate");
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                match Renderer::new(window.clone(), self.settings.portal_render_scale) {
                    Ok(mut renderer) => {
                        let size = window.inner_size();
                        if size.width > 0 && size.height > 0 {
                            self.camera.aspect = size.width as f32 / size.height as f32;
                        }
                        renderer.upload_scene(&self.scene.objects);
                        renderer.register_traveler(self.scene.cube, &self.travelers);
                        renderer.register_traveler(self.scene.player, &self.travelers);

                        info!("Client window and renderer initialized");
                        self.window = Some(window.clone());
                        self.renderer = Some(renderer);
                        self.set_cursor_grab(true);
                        let now = Instant::now();
                        self.last_frame = Some(now);
                        self.fps_sample_start = Some(now);
                        self.fps_frame_count = 0;
                    }
                    Err(err) => {
                        error!("failed to initialize renderer: {err}");
                        event_loop.exit();
                    }
                }
            }
            Err(err) => {
                error!("failed to create client window: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|window| window.id()) != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested; shutting down client event loop");
                if let Err(err) = self.settings.save(Path::new(SETTINGS_PATH)) {
                    warn!("Failed to save settings: {err}");
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
                if size.height > 0 {
                    self.camera.aspect = size.width as f32 / size.height as f32;
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => {
                            if code == KeyCode::Escape {
                                self.set_cursor_grab(false);
                            } else {
                                self.input.press_key(code);
                            }
                        }
                        ElementState::Released => self.input.release_key(code),
                    }
                }
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                if !self.cursor_grabbed {
                    self.set_cursor_grab(true);
                }
            }
            WindowEvent::RedrawRequested => {
                self.update_and_render(event_loop);
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if !self.cursor_grabbed {
            return;
        }

        if let DeviceEvent::MouseMotion { delta } = event {
            self.input
                .add_mouse_delta(Vec2::new(delta.0 as f32, delta.1 as f32));
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

pub fn run() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
    println!("Riftgate client starting...");

    let event_loop = match EventLoop::new() {
        Ok(loop_handle) => loop_handle,
        Err(err) => {
            eprintln!("Failed to create event loop: {err}");
            return;
        }
    };

    let mut app = ClientApp::default();
    if let Err(err) = event_loop.run_app(&mut app) {
        eprintln!("Event loop exited with error: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_out_of_range_settings() {
        let settings = ClientSettings {
            mouse_sensitivity: 500.0,
            fov: 10.0,
            portal_render_scale: 0.0,
            show_fps: true,
        }
        .sanitize();

        assert_eq!(settings.mouse_sensitivity, MAX_MOUSE_SENSITIVITY);
        assert_eq!(settings.fov, MIN_FOV);
        assert_eq!(settings.portal_render_scale, MIN_PORTAL_RENDER_SCALE);
        assert!(settings.show_fps);
    }

    #[test]
    fn settings_deserialize_fills_missing_fields() {
        let settings: ClientSettings = toml::from_str("fov = 90.0").unwrap();
        assert_eq!(settings.fov, 90.0);
        assert_eq!(settings.mouse_sensitivity, default_mouse_sensitivity());
        assert_eq!(settings.portal_render_scale, default_portal_render_scale());
        assert!(!settings.show_fps);
    }
}
