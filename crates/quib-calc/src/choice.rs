//! 覆寫選擇樹
//!
//! 指派沿反推鏈往上走，鏈上允許覆寫的節點都是候選；
//! 反推產生多個子指派的節點是分歧點，每個子指派各自一棵子樹。

use std::collections::VecDeque;

use quib_core::{QuibError, Result};

use crate::graph::Graph;
use crate::inversion::Target;
use crate::overrider::Assignment;
use crate::quib::NodeId;

/// 反推鏈上的一個節點與它收到的指派
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
    pub node: NodeId,
    pub assignment: Assignment,
}

/// 覆寫選擇樹
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideChoiceTree {
    /// 由起點往上的反推鏈
    pub chain: Vec<ChainLink>,
    /// 可覆寫節點在鏈上的位置
    pub options: Vec<usize>,
    /// 反推分歧的節點
    pub diverge: Option<NodeId>,
    pub children: Vec<OverrideChoiceTree>,
}

impl OverrideChoiceTree {
    pub fn start(&self) -> Option<NodeId> {
        self.chain.first().map(|link| link.node)
    }

    pub fn option_nodes(&self) -> Vec<NodeId> {
        self.options.iter().map(|&i| self.chain[i].node).collect()
    }

    /// 每個分支都能落地時才能分歧
    pub fn can_diverge(&self) -> bool {
        self.diverge.is_some() && !self.children.is_empty() && self.children.iter().all(|c| !c.is_empty())
    }

    /// 沒有候選也無法分歧
    pub fn is_empty(&self) -> bool {
        self.options.is_empty() && !self.can_diverge()
    }
}

/// 選擇器的回答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideChoice {
    /// 覆寫指定的候選節點
    Override(NodeId),
    /// 繼續往所有分支反推
    Diverge,
    /// 放棄整個指派
    Cancel,
}

/// 歧義指派的外部選擇器
pub trait OverrideChooser {
    fn choose(&mut self, start: NodeId, options: &[NodeId], can_diverge: bool) -> OverrideChoice;
}

/// 一律放棄
#[derive(Debug, Clone, Copy, Default)]
pub struct DecliningChooser;

impl OverrideChooser for DecliningChooser {
    fn choose(&mut self, _start: NodeId, _options: &[NodeId], _can_diverge: bool) -> OverrideChoice {
        OverrideChoice::Cancel
    }
}

/// 依序回放預先準備的回答，用完後放棄
#[derive(Debug, Clone, Default)]
pub struct ScriptedChooser {
    answers: VecDeque<OverrideChoice>,
}

impl ScriptedChooser {
    pub fn new(answers: impl IntoIterator<Item = OverrideChoice>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl OverrideChooser for ScriptedChooser {
    fn choose(&mut self, _start: NodeId, _options: &[NodeId], _can_diverge: bool) -> OverrideChoice {
        self.answers.pop_front().unwrap_or(OverrideChoice::Cancel)
    }
}

/// 選擇記憶的鍵：相同形狀的歧義重用上次的回答
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChoiceKey {
    pub start: NodeId,
    pub options: Vec<NodeId>,
    pub can_diverge: bool,
}

impl ChoiceKey {
    pub fn new(start: NodeId, mut options: Vec<NodeId>, can_diverge: bool) -> Self {
        options.sort();
        Self {
            start,
            options,
            can_diverge,
        }
    }

    /// 鍵中引用的所有節點
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(self.start).chain(self.options.iter().copied())
    }
}

/// 選擇樹解析結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// 要寫入的覆寫
    pub writes: Vec<ChainLink>,
    /// 被越過的節點；其重疊的舊覆寫需要移除
    pub passed: Vec<ChainLink>,
}

impl Graph {
    /// 建立以 `start` 為起點的覆寫選擇樹
    pub fn build_choice_tree(&mut self, start: NodeId, assignment: Assignment) -> Result<OverrideChoiceTree> {
        self.build_tree(start, assignment, 0)
    }

    fn build_tree(&mut self, start: NodeId, assignment: Assignment, depth: usize) -> Result<OverrideChoiceTree> {
        let mut tree = OverrideChoiceTree::default();
        let mut current = start;
        let mut assignment = assignment;

        loop {
            if depth + tree.chain.len() > self.config.recursion_limit {
                return Err(QuibError::RecursionLimit(self.config.recursion_limit));
            }
            if self.quib(current)?.allow_overriding {
                tree.options.push(tree.chain.len());
            }
            tree.chain.push(ChainLink {
                node: current,
                assignment: assignment.clone(),
            });

            let mut inversions = match self.invert(current, &assignment) {
                Ok(inversions) => inversions,
                Err(QuibError::UnsupportedInversion(reason)) => {
                    tracing::debug!("反推鏈止於 {}: {}", self.label(current), reason);
                    break;
                }
                Err(err) => return Err(err),
            };

            if inversions.len() > 1 {
                tracing::debug!("{} 分歧為 {} 個分支", self.label(current), inversions.len());
                tree.diverge = Some(current);
                let nested = depth + tree.chain.len();
                for inversion in inversions {
                    let child = match inversion.target {
                        Target::Quib(parent) => self.build_tree(parent, inversion.assignment, nested)?,
                        Target::Literal => OverrideChoiceTree::default(),
                    };
                    tree.children.push(child);
                }
                break;
            }
            match inversions.pop() {
                Some(inversion) => match inversion.target {
                    Target::Quib(parent) => {
                        current = parent;
                        assignment = inversion.assignment;
                    }
                    Target::Literal => break,
                },
                None => break,
            }
        }
        Ok(tree)
    }

    /// 解析選擇樹；`None` 代表選擇器放棄
    pub fn resolve_choice_tree(&mut self, tree: &OverrideChoiceTree) -> Result<Option<Resolution>> {
        let Some(start) = tree.start() else {
            return Err(QuibError::OverrideNotAllowed("指派落在字面值上".to_string()));
        };
        let can_diverge = tree.can_diverge();
        let options = tree.option_nodes();

        let choice = match (options.as_slice(), can_diverge) {
            ([], false) => {
                return Err(QuibError::OverrideNotAllowed(format!(
                    "{} 以上沒有可覆寫的節點",
                    self.label(start)
                )))
            }
            ([only], false) => OverrideChoice::Override(*only),
            ([], true) => OverrideChoice::Diverge,
            _ => self.ask(start, options.clone(), can_diverge),
        };

        match choice {
            OverrideChoice::Cancel => Ok(None),
            OverrideChoice::Override(node) => {
                let position = tree
                    .options
                    .iter()
                    .copied()
                    .find(|&i| tree.chain[i].node == node)
                    .ok_or_else(|| QuibError::OverrideNotAllowed(format!("{} 不是候選節點", self.label(node))))?;
                Ok(Some(Resolution {
                    writes: vec![tree.chain[position].clone()],
                    passed: tree.chain[..position].to_vec(),
                }))
            }
            OverrideChoice::Diverge => {
                if !can_diverge {
                    return Err(QuibError::OverrideNotAllowed(format!(
                        "{} 的分支無法全部落地",
                        self.label(start)
                    )));
                }
                let mut resolution = Resolution {
                    writes: Vec::new(),
                    passed: tree.chain.clone(),
                };
                for child in &tree.children {
                    match self.resolve_choice_tree(child)? {
                        Some(branch) => {
                            resolution.writes.extend(branch.writes);
                            resolution.passed.extend(branch.passed);
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(resolution))
            }
        }
    }

    fn ask(&mut self, start: NodeId, options: Vec<NodeId>, can_diverge: bool) -> OverrideChoice {
        let key = ChoiceKey::new(start, options.clone(), can_diverge);
        if self.config.cache_choices {
            if let Some(choice) = self.choices.get(&key) {
                tracing::debug!("重用 {} 的覆寫選擇", self.label(start));
                return *choice;
            }
        }
        self.prompts += 1;
        let choice = self.chooser.choose(start, &options, can_diverge);
        if self.config.cache_choices && choice != OverrideChoice::Cancel {
            self.choices.insert(key, choice);
        }
        choice
    }

    /// 詢問選擇器的次數
    pub fn chooser_prompts(&self) -> usize {
        self.prompts
    }

    /// 忘記所有記住的覆寫選擇
    pub fn clear_choices(&mut self) {
        self.choices.clear();
    }
}
