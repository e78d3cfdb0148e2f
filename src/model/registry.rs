// 该文件是 Huakuang （画框） 项目的一部分。
// src/model/registry.rs - 模型实例注册表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 按变体标识缓存已加载的检测器。
//!
//! 同一标识只创建一次；对同一实例的推理互斥执行，
//! 不同实例之间互不阻塞。创建失败不会写入缓存。

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard, OnceLock},
};

use tracing::{debug, info, warn};

use crate::{
  input::DecodedImage,
  model::{Detection, DynDetector, ModelError},
};

pub type SharedDetector = Arc<Mutex<DynDetector>>;

type Factory = dyn Fn(&str) -> Result<DynDetector, ModelError> + Send + Sync;

/// 每个变体一个槽位，加载只锁住自己的槽位
#[derive(Default)]
struct Slot {
  loading: Mutex<()>,
  detector: OnceLock<SharedDetector>,
}

pub struct ModelRegistry {
  factory: Box<Factory>,
  slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl ModelRegistry {
  pub fn new<F>(factory: F) -> Self
  where
    F: Fn(&str) -> Result<DynDetector, ModelError> + Send + Sync + 'static,
  {
    Self {
      factory: Box::new(factory),
      slots: Mutex::new(HashMap::new()),
    }
  }

  /// 以 URL 字符串为变体标识的注册表，创建时按方案选择检测器
  #[cfg(feature = "model_onnx")]
  pub fn from_urls() -> Self {
    use crate::FromUrl;

    Self::new(|key| {
      let url = url::Url::parse(key)
        .map_err(|e| ModelError::ModelPathError(format!("无法解析模型地址 {key}: {e}")))?;
      let wrapper = super::DetectorWrapper::from_url(&url)?;
      Ok(Box::new(wrapper) as DynDetector)
    })
  }

  fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
    // 持锁线程 panic 后表内容仍然完整
    self
      .slots
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn slot(&self, key: &str) -> Arc<Slot> {
    Arc::clone(self.lock_slots().entry(key.to_string()).or_default())
  }

  fn is_current(&self, key: &str, slot: &Arc<Slot>) -> bool {
    self
      .lock_slots()
      .get(key)
      .is_some_and(|current| Arc::ptr_eq(current, slot))
  }

  /// 取出已有实例，不存在时调用工厂创建。
  ///
  /// 工厂只在该变体的槽位锁内运行，表锁在此期间已释放，
  /// 其他变体的创建与检测不会等待。
  pub fn get_or_create(&self, key: &str) -> Result<SharedDetector, ModelError> {
    loop {
      let slot = self.slot(key);
      if let Some(existing) = slot.detector.get() {
        debug!("复用模型实例: {}", key);
        return Ok(Arc::clone(existing));
      }

      let _loading = slot
        .loading
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      if let Some(existing) = slot.detector.get() {
        debug!("复用模型实例: {}", key);
        return Ok(Arc::clone(existing));
      }
      // 等待期间槽位被移除（创建失败或被驱逐），重新取槽位
      if !self.is_current(key, &slot) {
        continue;
      }

      info!("创建模型实例: {}", key);
      return match (self.factory)(key) {
        Ok(detector) => {
          let shared = Arc::new(Mutex::new(detector));
          let stored = slot.detector.get_or_init(|| Arc::clone(&shared));
          Ok(Arc::clone(stored))
        }
        Err(e) => {
          warn!("模型 {} 创建失败: {}", key, e);
          let mut slots = self.lock_slots();
          if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            slots.remove(key);
          }
          Err(e)
        }
      };
    }
  }

  /// 在指定实例上执行一次检测
  pub fn detect(&self, key: &str, image: &DecodedImage) -> Result<Vec<Detection>, ModelError> {
    let shared = self.get_or_create(key)?;
    let detector = shared
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    detector.infer(image)
  }

  /// 移除实例，正在进行的推理持有自己的引用，不受影响
  pub fn evict(&self, key: &str) -> bool {
    let removed = self
      .lock_slots()
      .remove(key)
      .is_some_and(|slot| slot.detector.get().is_some());
    if removed {
      info!("移除模型实例: {}", key);
    }
    removed
  }

  /// 仅统计已创建完成的实例
  pub fn contains(&self, key: &str) -> bool {
    self
      .lock_slots()
      .get(key)
      .is_some_and(|slot| slot.detector.get().is_some())
  }

  pub fn len(&self) -> usize {
    self
      .lock_slots()
      .values()
      .filter(|slot| slot.detector.get().is_some())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    geometry::BBox,
    model::{Model, ModelError},
  };
  use image::RgbaImage;
  use std::{
    sync::{
      atomic::{AtomicUsize, Ordering},
      mpsc,
    },
    thread,
    time::{Duration, Instant},
  };

  struct Fixed(&'static str);

  impl Model for Fixed {
    type Input = DecodedImage;
    type Output = Vec<Detection>;
    type Error = ModelError;

    fn infer(&self, _: &DecodedImage) -> Result<Vec<Detection>, ModelError> {
      Ok(vec![Detection {
        bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
        class_label: self.0.to_string(),
        confidence: 1.0,
      }])
    }
  }

  fn counting_registry(created: Arc<AtomicUsize>) -> ModelRegistry {
    ModelRegistry::new(move |key| {
      created.fetch_add(1, Ordering::SeqCst);
      match key {
        "yolov8" => Ok(Box::new(Fixed("v8")) as DynDetector),
        "yolo11" => Ok(Box::new(Fixed("v11")) as DynDetector),
        other => Err(ModelError::ModelPathError(other.to_string())),
      }
    })
  }

  #[test]
  fn creates_each_variant_once() {
    let created = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(created.clone());
    let image = DecodedImage::from(RgbaImage::new(2, 2));

    assert_eq!(registry.detect("yolov8", &image).unwrap()[0].class_label, "v8");
    assert_eq!(registry.detect("yolov8", &image).unwrap()[0].class_label, "v8");
    assert_eq!(registry.detect("yolo11", &image).unwrap()[0].class_label, "v11");
    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(registry.len(), 2);
  }

  #[test]
  fn failed_creation_is_not_cached() {
    let created = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(created.clone());

    assert!(registry.get_or_create("missing").is_err());
    assert!(registry.get_or_create("missing").is_err());
    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert!(registry.is_empty());
  }

  #[test]
  fn evicted_variant_is_recreated() {
    let created = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(created.clone());

    let first = registry.get_or_create("yolov8").unwrap();
    assert!(registry.evict("yolov8"));
    assert!(!registry.evict("yolov8"));
    let second = registry.get_or_create("yolov8").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(created.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn concurrent_requests_share_one_instance() {
    let created = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(counting_registry(created.clone()));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
          let image = DecodedImage::from(RgbaImage::new(2, 2));
          registry.detect("yolo11", &image).unwrap().len()
        })
      })
      .collect();

    for handle in handles {
      assert_eq!(handle.join().unwrap(), 1);
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(registry.contains("yolo11"));
  }

  #[test]
  fn slow_creation_does_not_block_other_variants() {
    let (started_tx, started_rx) = mpsc::channel();
    let started_tx = Mutex::new(started_tx);
    let registry = Arc::new(ModelRegistry::new(move |key| {
      if key == "slow" {
        started_tx.lock().unwrap().send(()).unwrap();
        thread::sleep(Duration::from_millis(1500));
      }
      Ok(Box::new(Fixed("any")) as DynDetector)
    }));
    let image = DecodedImage::from(RgbaImage::new(2, 2));
    registry.detect("fast", &image).unwrap();

    let loading = {
      let registry = Arc::clone(&registry);
      thread::spawn(move || registry.get_or_create("slow").is_ok())
    };
    started_rx.recv().unwrap();
    assert!(!registry.contains("slow"));

    let now = Instant::now();
    registry.detect("fast", &image).unwrap();
    registry.detect("other", &image).unwrap();
    assert!(now.elapsed() < Duration::from_millis(500));
    assert!(!loading.is_finished());

    assert!(loading.join().unwrap());
    assert!(registry.contains("slow"));
    assert_eq!(registry.len(), 3);
  }

  #[test]
  fn waiters_share_the_slow_instance() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let registry = Arc::new(ModelRegistry::new(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(100));
      Ok(Box::new(Fixed("slow")) as DynDetector)
    }));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.get_or_create("slow").unwrap())
      })
      .collect();
    let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
  }
}
