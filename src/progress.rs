//! Модуль для отслеживания прогресса выполнения операций
//!
//! Реализация паттерна Observer: этапы задания сообщают `(completed, total,
//! phase)`, репортер рассылает это наблюдателям. Отправка уведомлений никогда
//! не блокирует конвейер.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Этапы задания
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Чтение субтитров и длительности видео
    Parsing,
    /// Перевод и синтез речи
    Synthesis,
    /// Сборка дорожки
    Assembly,
    /// Выравнивание длины дорожки
    Finalizing,
    /// Замена аудио в видео
    Muxing,
}

impl Phase {
    /// Получить название этапа в виде строки
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Synthesis => "synthesis",
            Self::Assembly => "assembly",
            Self::Finalizing => "finalizing",
            Self::Muxing => "muxing",
        }
    }

    /// Доля этапа в общем прогрессе (в процентах)
    pub fn weight(&self) -> f32 {
        match self {
            Self::Parsing => 5.0,
            Self::Synthesis => 70.0,
            Self::Assembly => 15.0,
            Self::Finalizing => 2.0,
            Self::Muxing => 8.0,
        }
    }

    /// Суммарный вес этапов до текущего
    fn offset(&self) -> f32 {
        const ORDER: [Phase; 5] = [Phase::Parsing, Phase::Synthesis, Phase::Assembly, Phase::Finalizing, Phase::Muxing];
        ORDER.iter().take_while(|phase| *phase != self).map(Phase::weight).sum()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Информация о прогрессе выполнения операции
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Текущий этап
    pub phase: Phase,
    /// Сколько единиц этапа завершено
    pub completed: usize,
    /// Сколько единиц всего
    pub total: usize,
    /// Общий процент выполнения всей операции (0.0 - 100.0)
    pub overall: f32,
    /// Дополнительная информация
    pub details: Option<String>,
}

impl ProgressInfo {
    pub fn new(phase: Phase, completed: usize, total: usize, details: Option<String>) -> Self {
        let fraction = if total == 0 { 1.0 } else { completed.min(total) as f32 / total as f32 };
        Self {
            phase,
            completed,
            total,
            overall: (phase.offset() + phase.weight() * fraction).clamp(0.0, 100.0),
            details,
        }
    }
}

/// Трейт для наблюдателя, получающего уведомления о прогрессе
pub trait ProgressObserver: Send + Sync {
    /// Метод, вызываемый при обновлении прогресса
    fn on_progress_update(&self, progress: ProgressInfo);
}

/// Трейт для объекта, отправляющего уведомления о прогрессе
pub trait ProgressReporter: Send + Sync {
    /// Добавить наблюдателя
    ///
    /// Возвращает уникальный идентификатор наблюдателя, который можно использовать
    /// для его удаления в будущем.
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize;

    /// Удалить наблюдателя по идентификатору
    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>>;

    /// Отправить уведомление всем наблюдателям
    fn notify_progress(&self, progress: ProgressInfo);
}

/// Репортер, синхронно вызывающий наблюдателей
pub struct DefaultProgressReporter {
    observers: Arc<RwLock<HashMap<usize, Box<dyn ProgressObserver>>>>,
    next_id: AtomicUsize,
}

impl DefaultProgressReporter {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl Default for DefaultProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for DefaultProgressReporter {
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().insert(id, observer);
        id
    }

    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>> {
        self.observers.write().remove(&id)
    }

    fn notify_progress(&self, progress: ProgressInfo) {
        let observers = self.observers.read();
        for observer in observers.values() {
            observer.on_progress_update(progress.clone());
        }
    }
}

/// Асинхронный репортер прогресса, использующий broadcast-канал Tokio.
///
/// `notify_progress` только кладет сообщение в канал; наблюдатели вызываются
/// из отдельной задачи, запущенной [`AsyncProgressReporter::start_handler`].
pub struct AsyncProgressReporter {
    tx: broadcast::Sender<ProgressInfo>,
    inner: DefaultProgressReporter,
}

impl AsyncProgressReporter {
    /// Создать новый асинхронный репортер прогресса
    pub fn new() -> (Self, broadcast::Receiver<ProgressInfo>) {
        let (tx, rx) = broadcast::channel(100);
        let reporter = Self {
            tx,
            inner: DefaultProgressReporter::new(),
        };
        (reporter, rx)
    }

    /// Запустить обработчик сообщений о прогрессе
    pub fn start_handler(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        let observers = self.inner.observers.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(progress) => {
                        for observer in observers.read().values() {
                            observer.on_progress_update(progress.clone());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("Progress handler lagged, {} updates dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl ProgressReporter for AsyncProgressReporter {
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        self.inner.add_observer(observer)
    }

    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>> {
        self.inner.remove_observer(id)
    }

    fn notify_progress(&self, progress: ProgressInfo) {
        // Ошибка означает лишь отсутствие подписчиков
        if self.tx.send(progress).is_err() {
            log::trace!("No progress subscribers");
        }
    }
}

/// Трекер прогресса задания
pub struct ProgressTracker {
    reporter: Option<Box<dyn ProgressReporter>>,
}

impl ProgressTracker {
    /// Создать трекер без репортера (уведомления отбрасываются)
    pub fn new() -> Self {
        Self { reporter: None }
    }

    /// Создать трекер с репортером
    pub fn with_reporter(reporter: Box<dyn ProgressReporter>) -> Self {
        Self { reporter: Some(reporter) }
    }

    /// Установить репортер прогресса
    pub fn set_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.reporter = Some(reporter);
    }

    /// Добавить наблюдателя; `None`, если репортер не установлен
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> Option<usize> {
        self.reporter.as_mut().map(|reporter| reporter.add_observer(observer))
    }

    /// Сообщить о прогрессе этапа
    pub fn report(&self, phase: Phase, completed: usize, total: usize, details: Option<String>) {
        if let Some(reporter) = &self.reporter {
            reporter.notify_progress(ProgressInfo::new(phase, completed, total, details));
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Сообщить о прогрессе, если трекер есть
pub(crate) fn report(
    tracker: Option<&ProgressTracker>,
    phase: Phase,
    completed: usize,
    total: usize,
    details: Option<String>,
) {
    if let Some(t) = tracker {
        t.report(phase, completed, total, details);
    }
}
